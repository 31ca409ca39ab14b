//! The credential tree: groups and entries held in an arena.
//!
//! Nodes are addressed by [`GroupId`] and [`EntryId`]. Each node keeps a
//! `parent` back-reference (a relation, not ownership) and every group keeps
//! one ordered child list mixing groups and entries. The tree owns all nodes;
//! ids are only meaningful for the tree that issued them.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::error::{KdbxError, Result};
use super::models::{AutoType, ProtectedBinary, ProtectedString, Times};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

/// A child slot in a group's ordered child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Group(GroupId),
    Entry(EntryId),
}

/// A folder of entries and sub-groups.
#[derive(Debug, Clone)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub notes: String,
    pub icon_id: u32,
    pub custom_icon: Option<Uuid>,
    pub times: Times,
    pub is_expanded: bool,
    pub default_auto_type_sequence: String,
    /// `None` inherits the setting from the parent group.
    pub enable_auto_type: Option<bool>,
    /// `None` inherits the setting from the parent group.
    pub enable_searching: Option<bool>,
    pub last_top_visible_entry: Uuid,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<NodeRef>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            notes: String::new(),
            icon_id: 48,
            custom_icon: None,
            times: Times::default(),
            is_expanded: true,
            default_auto_type_sequence: String::new(),
            enable_auto_type: None,
            enable_searching: None,
            last_top_visible_entry: Uuid::nil(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }
}

/// A single credential record.
#[derive(Debug, Clone)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon_id: u32,
    pub custom_icon: Option<Uuid>,
    pub foreground_color: String,
    pub background_color: String,
    pub override_url: String,
    pub tags: Vec<String>,
    pub times: Times,
    /// Field name → value. Serialized in key order.
    pub strings: BTreeMap<String, ProtectedString>,
    /// Attachment name → blob. Serialized in key order.
    pub binaries: BTreeMap<String, ProtectedBinary>,
    pub auto_type: AutoType,
    history: Vec<Entry>,
    pub(crate) parent: Option<GroupId>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            icon_id: 0,
            custom_icon: None,
            foreground_color: String::new(),
            background_color: String::new(),
            override_url: String::new(),
            tags: Vec::new(),
            times: Times::default(),
            strings: BTreeMap::new(),
            binaries: BTreeMap::new(),
            auto_type: AutoType::default(),
            history: Vec::new(),
            parent: None,
        }
    }
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value with that name.
    pub fn set_string(&mut self, key: impl Into<String>, value: ProtectedString) {
        self.strings.insert(key.into(), value);
    }

    pub fn get_string(&self, key: &str) -> Option<&ProtectedString> {
        self.strings.get(key)
    }

    pub fn set_binary(&mut self, name: impl Into<String>, value: ProtectedBinary) {
        self.binaries.insert(name.into(), value);
    }

    pub fn history(&self) -> &[Entry] {
        &self.history
    }

    /// Appends a history snapshot. Any history the snapshot carries is dropped.
    pub fn push_history(&mut self, mut snapshot: Entry) {
        snapshot.history.clear();
        snapshot.parent = None;
        self.history.push(snapshot);
    }

    /// A copy of this entry suitable for [`Entry::push_history`].
    pub fn snapshot(&self) -> Entry {
        Entry {
            history: Vec::new(),
            parent: None,
            ..self.clone()
        }
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }
}

/// One step of a document-order walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Group(GroupId),
    Entry(EntryId),
}

/// Arena holding the group hierarchy.
#[derive(Debug, Clone)]
pub struct Tree {
    groups: Vec<Group>,
    entries: Vec<Entry>,
    root: GroupId,
}

impl Tree {
    pub fn new(mut root: Group) -> Self {
        root.parent = None;
        root.children.clear();
        Self {
            groups: vec![root],
            entries: Vec::new(),
            root: GroupId(0),
        }
    }

    pub fn root(&self) -> GroupId {
        self.root
    }

    /// `None` when `id` comes from another tree.
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.0)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0)
    }

    /// Appends `group` as the last child of `parent`.
    pub fn add_group(&mut self, parent: GroupId, mut group: Group) -> Result<GroupId> {
        self.check_group(parent)?;
        let id = GroupId(self.groups.len());
        group.parent = Some(parent);
        group.children.clear();
        self.groups.push(group);
        self.groups[parent.0].children.push(NodeRef::Group(id));
        Ok(id)
    }

    /// Appends `entry` as the last child of `parent`.
    pub fn add_entry(&mut self, parent: GroupId, mut entry: Entry) -> Result<EntryId> {
        self.check_group(parent)?;
        let id = EntryId(self.entries.len());
        entry.parent = Some(parent);
        self.entries.push(entry);
        self.groups[parent.0].children.push(NodeRef::Entry(id));
        Ok(id)
    }

    fn check_group(&self, id: GroupId) -> Result<()> {
        if id.0 < self.groups.len() {
            Ok(())
        } else {
            Err(KdbxError::StructuralInconsistency(format!(
                "group id {} does not belong to this tree",
                id.0
            )))
        }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Returns every node below the root in document order.
    ///
    /// Within a group, its entries come first and then its child groups,
    /// each followed by its own subtree. Both keep child-list order. The
    /// walk uses an explicit stack, so depth is not bounded by recursion.
    pub fn walk(&self) -> Walk<'_> {
        let mut walk = Walk { tree: self, pending: Vec::new() };
        walk.push_children(self.root);
        walk
    }
}

/// Iterator returned by [`Tree::walk`].
pub struct Walk<'a> {
    tree: &'a Tree,
    pending: Vec<Visit>,
}

impl Walk<'_> {
    fn push_children(&mut self, id: GroupId) {
        let children = &self.tree.groups[id.0].children;
        // Pushed in reverse so that entries pop first, then groups, in order.
        for child in children.iter().rev() {
            if let NodeRef::Group(g) = child {
                self.pending.push(Visit::Group(*g));
            }
        }
        for child in children.iter().rev() {
            if let NodeRef::Entry(e) = child {
                self.pending.push(Visit::Entry(*e));
            }
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = Visit;

    fn next(&mut self) -> Option<Visit> {
        let visit = self.pending.pop()?;
        if let Visit::Group(id) = visit {
            self.push_children(id);
        }
        Some(visit)
    }
}
