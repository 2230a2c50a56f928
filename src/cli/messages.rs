//! Messages command implementation

use anyhow::Result;

use crate::fasttime;
use crate::store::Source;

pub fn run(src: &Source, channel_id: &str, thread_ts: Option<&str>) -> Result<()> {
    let messages = match thread_ts {
        Some(ts) => src.all_thread_messages(channel_id, ts)?,
        None => src.all_messages(channel_id)?,
    };

    if messages.is_empty() {
        println!("No messages captured for {channel_id}.");
        return Ok(());
    }

    for m in messages {
        let when = fasttime::ts_to_id(&m.ts)
            .map(|id| fasttime::id_to_time(id).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| m.ts.clone());
        let user = m.user.as_deref().unwrap_or("-");

        // one line per message, first text line only
        let text = m.text.lines().next().unwrap_or("");
        let marker = if m.is_thread_start() { "+" } else { " " };
        println!("{when} {marker} {user:<12} {text}");
    }

    Ok(())
}
