//! `relayctl connect` and `relayctl forget`.

use relayctl_core::DeviceAddress;

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::{status, util};

pub async fn handle_connect(args: ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let address: DeviceAddress = args.address.parse()?;
    let controller = util::controller(config::device_config(global, false)?);

    let spinner = util::spinner(global, &format!("Connecting to {address}..."));
    let result = controller.connect_to(address).await;
    spinner.finish_and_clear();
    result?;

    util::settle(&controller).await;
    status::print(&controller, global);
    controller.disconnect().await;
    Ok(())
}

pub async fn handle_forget(global: &GlobalOpts) -> Result<(), CliError> {
    if !util::confirm("Forget the remembered device address?", "forget", global.yes)? {
        return Ok(());
    }

    let controller = util::controller(config::device_config(global, false)?);
    controller.forget().await?;
    output::print_output("Device address forgotten", global.quiet);
    Ok(())
}
