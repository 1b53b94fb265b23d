//! `relayctl watch`: stream state changes and notices until Ctrl-C.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use relayctl_core::{Controller, DeviceState, RelayId};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

fn line(controller: &Controller, state: &DeviceState, global: &GlobalOpts, color: bool) -> String {
    match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            serde_json::to_string(state).unwrap_or_default()
        }
        OutputFormat::Yaml => {
            format!("---\n{}", serde_yaml::to_string(state).unwrap_or_default())
        }
        OutputFormat::Plain => RelayId::ALL
            .iter()
            .map(|&r| {
                let s = state.relay(r);
                format!("{}{}", u8::from(s.commanded), u8::from(s.feedback))
            })
            .collect::<Vec<_>>()
            .join(" "),
        OutputFormat::Table => {
            let relays = RelayId::ALL
                .iter()
                .map(|&r| {
                    let s = state.relay(r);
                    format!(
                        "R{r} {}/{}",
                        output::on_off(s.commanded, color),
                        output::on_off(s.feedback, color)
                    )
                })
                .collect::<Vec<_>>()
                .join("  ");
            let at = state
                .last_update
                .map_or_else(|| "--:--:--".into(), |t| t.format("%H:%M:%S").to_string());
            let via = controller
                .primary_link()
                .map_or_else(|| "down".into(), |k| k.to_string());
            format!("{at}  {relays}  rssi {:>4}  via {via}", state.rssi)
        }
    }
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::open_session(global, !args.poll_only).await?;
    let color = output::should_color(&global.color);

    let mut state = controller.state();
    let mut notices = controller.notices();
    let deadline = args.duration.map(Duration::from_secs);
    let stop = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    output::print_output(&line(&controller, &state.borrow_and_update(), global, color), global.quiet);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut stop => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                output::print_output(&line(&controller, &snapshot, global, color), global.quiet);
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    if !global.quiet {
                        eprintln!("{}: {}", output::notice_prefix(notice.level, color), notice.message);
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.disconnect().await;
    Ok(())
}
