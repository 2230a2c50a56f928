//! Info command implementation

use anyhow::Result;

use crate::store::{Error, Source};

pub fn run(src: &Source) -> Result<()> {
    match src.workspace_info() {
        Ok(w) => {
            println!("Team:       {} ({})", w.team, w.team_id);
            println!("Crawled as: {} ({})", w.user, w.user_id);
            if let Some(ent) = &w.enterprise_id {
                println!("Enterprise: {ent}");
            }
            if !w.url.is_empty() {
                println!("URL:        {}", w.url);
            }
        }
        Err(Error::NotFound) => println!("No workspace info captured."),
        Err(e) => return Err(e.into()),
    }

    for s in src.sessions()? {
        println!(
            "Session {}: mode={} finished={}",
            s.id, s.mode, s.finished
        );
    }

    Ok(())
}
