//! Sessions command implementation

use anyhow::Result;

use crate::store::Source;

pub fn run(src: &Source) -> Result<()> {
    let sessions = src.sessions()?;

    if sessions.is_empty() {
        println!("No sessions recorded.");
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<20} {:<12} {:<9} {}",
        "ID", "Parent", "Created", "Mode", "Finished", "Args"
    );
    println!("{}", "-".repeat(70));

    for s in sessions {
        let parent = s
            .parent_id
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<8} {:<20} {:<12} {:<9} {}",
            s.id,
            parent,
            s.created_at,
            s.mode,
            if s.finished { "yes" } else { "no" },
            s.args,
        );
    }

    Ok(())
}
