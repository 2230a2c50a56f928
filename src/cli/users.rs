//! Users command implementation

use anyhow::Result;

use crate::store::Source;

pub fn run(src: &Source) -> Result<()> {
    let users = src.users()?;

    if users.is_empty() {
        println!("No users captured.");
        return Ok(());
    }

    println!("{:<14} {:<24} {}", "ID", "Name", "Deleted");
    println!("{}", "-".repeat(48));

    for u in users {
        println!(
            "{:<14} {:<24} {}",
            u.id,
            if u.name.is_empty() { "-" } else { &u.name },
            if u.deleted { "yes" } else { "" },
        );
    }

    Ok(())
}
