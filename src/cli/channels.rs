//! Channels command implementation

use anyhow::Result;

use crate::store::Source;

pub fn run(src: &Source) -> Result<()> {
    let channels = src.channels()?;

    if channels.is_empty() {
        println!("No channels captured.");
        return Ok(());
    }

    println!(
        "{:<14} {:<24} {:>8} {:>9}",
        "ID", "Name", "Members", "Messages"
    );
    println!("{}", "-".repeat(60));

    for ch in channels {
        let members = if ch.members.is_empty() {
            ch.num_members
        } else {
            ch.members.len() as i64
        };
        let messages = src.count_messages(&ch.id)?;
        println!(
            "{:<14} {:<24} {:>8} {:>9}",
            ch.id,
            if ch.name.is_empty() { "-" } else { &ch.name },
            members,
            messages,
        );
    }

    Ok(())
}
