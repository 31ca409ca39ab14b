use kdbx_writer::kdbx::types::tree::Visit;
use kdbx_writer::{
    CompositeKey, CompressionAlgorithm, Database, Entry, Group, KdbxVersion, KdbxWriter,
    ProtectedBinary, ProtectedString,
};
use std::env;
use std::fs::File;
use std::io::BufWriter;

fn sample_database(password: &str, version: KdbxVersion, compress: bool) -> kdbx_writer::Result<Database> {
    let mut db = Database::new("Sample", CompositeKey::from_password(password));
    db.version = version;
    if !compress {
        db.compression = CompressionAlgorithm::None;
    }

    let root = db.tree.root();
    let email = db.tree.add_group(root, Group::new("Email"))?;
    let banking = db.tree.add_group(root, Group::new("Banking"))?;
    if let Some(group) = db.tree.group_mut(banking) {
        group.notes = "Accounts and cards".to_string();
        group.is_expanded = false;
    }

    let mut entry = Entry::new();
    entry.set_string("Title", ProtectedString::plain("Mail account"));
    entry.set_string("UserName", ProtectedString::plain("alice@example.com"));
    entry.set_string("Password", ProtectedString::protected("hunter2"));
    entry.set_string("URL", ProtectedString::plain("https://mail.example.com"));
    entry.set_binary("recovery.txt", ProtectedBinary::new(b"recovery codes".to_vec(), false));
    let snapshot = entry.snapshot();
    entry.set_string("Password", ProtectedString::protected("correct horse"));
    entry.push_history(snapshot);
    db.tree.add_entry(email, entry)?;

    Ok(db)
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <out.kdbx> [--password <PASSWORD>] [--legacy] [--no-compress]", args[0]);
        std::process::exit(1);
    }

    let out_path = &args[1];
    let mut password = "password".to_string();
    if let Some(idx) = args.iter().position(|arg| arg == "--password") {
        match args.get(idx + 1) {
            Some(p) => password = p.clone(),
            None => {
                eprintln!("ERROR: --password flag requires an argument.");
                std::process::exit(1);
            }
        }
    }
    let version = if args.iter().any(|arg| arg == "--legacy") { KdbxVersion::V3 } else { KdbxVersion::V4 };
    let compress = !args.iter().any(|arg| arg == "--no-compress");

    println!("Writing sample database: {}", out_path);
    println!("{}", "=".repeat(60));

    let db = match sample_database(&password, version, compress) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to build sample database: {}", e);
            std::process::exit(1);
        }
    };

    let file = match File::create(out_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Cannot create {}: {}", out_path, e);
            std::process::exit(1);
        }
    };

    match KdbxWriter::new(&db).write(BufWriter::new(file)) {
        Ok(()) => {
            println!("SUCCESS! Database written.");
            println!("{}", "=".repeat(60));
            println!("\nDatabase Information:");
            println!("  Name: {}", db.meta.name);
            println!("  Version: {:#010x}", db.effective_version().raw());
            println!("  Compression: {:?}", db.compression);
            println!("  Groups: {}", db.tree.num_groups());
            println!("  Entries: {}", db.tree.num_entries());
            for visit in db.tree.walk() {
                if let Visit::Entry(id) = visit {
                    let title = db
                        .tree
                        .entry(id)
                        .and_then(|entry| entry.get_string("Title"))
                        .map_or("(untitled)", |title| title.as_str());
                    println!("    - {}", title);
                }
            }
        }
        Err(e) => {
            eprintln!("\n{}", "=".repeat(60));
            eprintln!("ERROR: Failed to write database");
            eprintln!("{}", "=".repeat(60));
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
