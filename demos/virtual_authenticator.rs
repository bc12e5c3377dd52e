//! Virtual FIDO2 / U2F authenticator on Linux UHID
//!
//! The device shows up as a USB security key, so browsers can use it for
//! WebAuthn testing. Records persist in `OPENFIDO_STATE_DIR`.
//!
//! # Usage
//!
//! ```bash
//! sudo modprobe uhid
//! RUST_LOG=debug cargo run --example virtual_authenticator --features uhid
//! ```
//!
//! Press Enter to touch the key, type `q` then Enter to quit. With `--auto`
//! every presence test is approved without asking.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use openfido::{
    AutoApprove, Device, DeviceConfig, FileStore, PresenceButton, Result, default_transports,
};
use openfido_ctap::UserPresence;

/// Read stdin on a side thread: empty lines press the button, `q` stops
fn spawn_console(button: Option<Arc<AtomicBool>>, stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "q" => break,
                _ => {
                    if let Some(button) = &button {
                        println!("touch");
                        button.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
        stop.store(true, Ordering::SeqCst);
    });
}

fn serve<P: UserPresence>(config: &DeviceConfig, presence: P, stop: &AtomicBool) -> Result<()> {
    let mut device: Device<FileStore, P> = Device::open(config, presence)?;
    for transport in default_transports(config)? {
        device.add_transport(transport);
    }

    println!(
        "openfido ready on {} (aaguid {}, {} resident keys)",
        device.transport_names().join(", "),
        hex::encode(device.context().config().aaguid),
        device.context().resident_key_count(),
    );
    device.run(stop)
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = DeviceConfig::from_env()?;
    let auto = std::env::args().any(|arg| arg == "--auto");
    let stop = Arc::new(AtomicBool::new(false));

    if auto {
        spawn_console(None, Arc::clone(&stop));
        serve(&config, AutoApprove, &stop)
    } else {
        let button = PresenceButton::new();
        spawn_console(Some(button.handle()), Arc::clone(&stop));
        serve(&config, button, &stop)
    }
}
