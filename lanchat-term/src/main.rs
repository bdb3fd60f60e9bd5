//! lanchat: terminal front end for `lanchat-core`.
//!
//! Lines typed on stdin are sent to the group; incoming events are drained
//! on a fixed tick and printed. EOF or Ctrl-C leaves the group.

mod render;
mod roster;
mod settings;

use lanchat_core::Session;
use log::{error, info, warn};
use roster::Roster;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = settings::load()?;
    info!(
        "Starting lanchat as {} on {}",
        config.display_name,
        config.group_addr()
    );

    let mut session = Session::start(config).await?;
    let mut roster = Roster::new(session.display_name());
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = session.send(text).await {
                        warn!("Send failed: {e}");
                        println!("* not sent: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("stdin: {e}");
                    break;
                }
            },
            _ = ticker.tick() => drain(&mut session, &mut roster),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Leaving group");
    session.stop().await;
    drain(&mut session, &mut roster);
    Ok(())
}

fn drain(session: &mut Session, roster: &mut Roster) {
    for event in session.poll() {
        roster.handle_event(&event);
        if let Some(msg) = event.to_message() {
            println!("{}", render::format_message(&msg));
        }
    }
    if roster.take_dirty() {
        println!("{}", render::format_roster(roster));
    }
}
