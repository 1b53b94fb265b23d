//! `relayctl status`: one snapshot of relay, feedback and link state.

use std::fmt::Write as _;

use serde::Serialize;
use relayctl_core::{
    Controller, DeviceAddress, DeviceState, LinkStatus, RelayId, TransportKind,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::log::LogRow;
use super::util;

#[derive(Serialize)]
struct StatusView {
    address: Option<DeviceAddress>,
    link: Option<TransportKind>,
    links: Vec<LinkView>,
    #[serde(flatten)]
    state: DeviceState,
}

#[derive(Serialize)]
struct LinkView {
    transport: TransportKind,
    status: LinkStatus,
}

fn view(controller: &Controller) -> StatusView {
    StatusView {
        address: controller.address(),
        link: controller.primary_link(),
        links: controller
            .links()
            .into_iter()
            .map(|(transport, status)| LinkView { transport, status })
            .collect(),
        state: controller.snapshot(),
    }
}

fn detail(v: &StatusView, color: bool) -> String {
    let s = &v.state;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Address:  {}",
        v.address.as_ref().map_or_else(|| "-".into(), ToString::to_string)
    );
    let _ = writeln!(
        out,
        "Link:     {}",
        v.link.map_or_else(|| "down".into(), |k| k.to_string())
    );
    for relay in RelayId::ALL {
        let r = s.relay(relay);
        let _ = writeln!(
            out,
            "Relay {relay}:  {:<3}  feedback {:<3}  {}",
            output::on_off(r.commanded, color),
            output::on_off(r.feedback, color),
            output::verdict(!r.is_mismatch(), color),
        );
    }
    let _ = writeln!(out, "Fault:    {}", if s.error { "yes" } else { "no" });
    let _ = writeln!(out, "RSSI:     {} dBm", s.rssi);
    if let Some(ssid) = &s.wifi_ssid {
        let _ = writeln!(out, "Wi-Fi:    {ssid}");
    }
    if let Some(ip) = &s.device_ip {
        let _ = writeln!(out, "Reported: {ip}");
    }
    let _ = write!(
        out,
        "Updated:  {}",
        s.last_update
            .map_or_else(|| "never".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    );

    if !s.error_log.is_empty() {
        let rows: Vec<LogRow> = s.error_log.iter().rev().map(LogRow::from).collect();
        let _ = write!(out, "\n\nError log:\n{}", output::render_table(&rows));
    }
    out
}

fn id(v: &StatusView) -> String {
    RelayId::ALL
        .iter()
        .map(|&relay| {
            let r = v.state.relay(relay);
            format!("relay{relay}={}", if r.commanded { "on" } else { "off" })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the controller's current view in the selected format.
pub fn print(controller: &Controller, global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let out = output::render_single(&global.output, &view(controller), |v| detail(v, color), id);
    output::print_output(&out, global.quiet);
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::open_session(global, false).await?;
    print(&controller, global);
    controller.disconnect().await;
    Ok(())
}
