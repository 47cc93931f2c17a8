use anyhow::Context;
use std::net::IpAddr;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "remoteplay.toml";

pub(crate) struct Args {
    pub host_ip: IpAddr,
    pub device_id: String,
    pub wake_credential: String,
    pub psn_account_id: Option<String>,
    pub pin: Option<String>,
    pub config_path: String,
    pub dump_video_dir: Option<String>,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut host_ip = None;
    let mut device_id = None;
    let mut wake_credential = String::new();
    let mut psn_account_id = None;
    let mut pin = None;
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut dump_video_dir = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("remoteplay-cli {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("remoteplay-cli - drive the Remote Play bridge core against a console");
                println!();
                println!("USAGE:");
                println!("    remoteplay-cli --host <IP> --device-id <ID> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --host <IP>               Console IP address (required)");
                println!("    --device-id <ID>          Stable id for the device store record (required)");
                println!("    --wake-credential <HEX>   Wake-on-LAN credential used if the host is in standby");
                println!("    --account-id <BASE64>     PSN account id, only needed on first registration");
                println!("    --pin <PIN>               8-digit registration PIN, only needed on first registration");
                println!("    --config <PATH>           Config file [default: remoteplay.toml]");
                println!("    --dump-video <DIR>        Write decoded video frames to <DIR> for inspection");
                println!("    -V, --version             Print version and exit");
                println!("    -h, --help                Print this help and exit");
                std::process::exit(0);
            }
            "--host" => {
                i += 1;
                host_ip = Some(
                    args.get(i)
                        .context("Missing --host value")?
                        .parse::<IpAddr>()
                        .context("Invalid --host value")?,
                );
            }
            "--device-id" => {
                i += 1;
                device_id = Some(args.get(i).context("Missing --device-id value")?.clone());
            }
            "--wake-credential" => {
                i += 1;
                wake_credential = args.get(i).context("Missing --wake-credential value")?.clone();
            }
            "--account-id" => {
                i += 1;
                psn_account_id = Some(args.get(i).context("Missing --account-id value")?.clone());
            }
            "--pin" => {
                i += 1;
                // Keep as a string: an 8-digit PIN with leading zeros is not
                // the same thing as the integer it looks like.
                pin = Some(args.get(i).context("Missing --pin value")?.clone());
            }
            "--config" => {
                i += 1;
                config_path = args.get(i).context("Missing --config value")?.clone();
            }
            "--dump-video" => {
                i += 1;
                dump_video_dir = Some(args.get(i).context("Missing --dump-video value")?.clone());
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        host_ip: host_ip.context("--host is required")?,
        device_id: device_id.context("--device-id is required")?,
        wake_credential,
        psn_account_id,
        pin,
        config_path,
        dump_video_dir,
    })
}
