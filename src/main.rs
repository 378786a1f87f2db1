//! Console streamer for GRBL controllers.
//!
//! Usage:
//!   grblkit ports
//!   grblkit stream <port> <file.nc>
//!   grblkit monitor <port>

use std::time::Duration;

use anyhow::{bail, Context};
use grblkit::{
    ConnectionParams, ControllerEvent, CoreEvent, GrblController, HoldCause, Job, ResumeOutcome,
    SenderEvent, WorkflowState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    grblkit::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("ports") => list_ports(),
        Some("stream") => {
            let [_, port, file] = args.as_slice() else {
                bail!("usage: grblkit stream <port> <file.nc>");
            };
            stream_file(port, file).await
        }
        Some("monitor") => {
            let [_, port] = args.as_slice() else {
                bail!("usage: grblkit monitor <port>");
            };
            monitor(port).await
        }
        _ => {
            eprintln!("usage: grblkit <ports | stream <port> <file.nc> | monitor <port>>");
            Ok(())
        }
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = grblkit::transport::list_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No CNC-like serial ports found");
        return Ok(());
    }
    for port in ports {
        println!("{:<24} {}", port.port_name, port.description);
    }
    Ok(())
}

async fn connect(port: &str) -> anyhow::Result<GrblController> {
    let controller = GrblController::new();
    controller
        .connect(&ConnectionParams {
            port: port.to_string(),
            ..Default::default()
        })
        .with_context(|| format!("opening {}", port))?;

    // Wait out identification
    for _ in 0..60 {
        if controller.is_connected() {
            let firmware = controller
                .firmware_version()?
                .unwrap_or_else(|| "unknown firmware".to_string());
            println!("Connected to {} ({})", port, firmware);
            return Ok(controller);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("no GRBL firmware detected on {}", port);
}

async fn stream_file(port: &str, file: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file))?;
    let job = Job::from_text(file, &text)?;
    let total = job.total_lines();
    println!("Streaming {} ({} lines)", file, total);

    let controller = connect(port).await?;
    let mut events = controller.bus().receiver();

    controller.load_job(job)?;
    controller.start_job()?;

    loop {
        let event = events.recv().await.context("event bus closed")?;
        match event {
            CoreEvent::Sender(SenderEvent::Status(status)) => {
                let eta = status
                    .estimated_remaining_secs
                    .map(|s| format!(", ~{:.0}s left", s))
                    .unwrap_or_default();
                print!(
                    "\r{}/{} lines acknowledged{}   ",
                    status.received, status.total_lines, eta
                );
            }
            CoreEvent::Sender(SenderEvent::Completed { elapsed_secs, .. }) => {
                println!("\nDone in {:.1}s", elapsed_secs);
                break;
            }
            CoreEvent::Sender(SenderEvent::Errored { line, .. }) => {
                println!("\nJob failed at line {}", line + 1);
                break;
            }
            CoreEvent::Workflow(grblkit::WorkflowEvent::StateChanged {
                state: WorkflowState::Paused,
                hold_reason: Some(reason),
            }) => {
                println!("\nPaused: {}", reason);
                if reason.cause == HoldCause::ToolChange {
                    println!("Change the tool, then press Enter to continue");
                    wait_for_enter().await?;
                    controller.acknowledge_hold()?;
                    match controller.resume()? {
                        ResumeOutcome::Resumed(_) => println!("Resuming"),
                        other => println!("Could not resume: {:?}", other),
                    }
                }
            }
            CoreEvent::Controller(ControllerEvent::Alarm { code, description }) => {
                println!("\nALARM {}: {}", code, description);
                break;
            }
            CoreEvent::Connection(grblkit::ConnectionEvent::Closed { reason, .. }) => {
                println!("\nConnection closed: {:?}", reason);
                return Ok(());
            }
            _ => {}
        }
    }

    controller.disconnect().await?;
    Ok(())
}

async fn monitor(port: &str) -> anyhow::Result<()> {
    let controller = connect(port).await?;
    let mut events = controller.bus().receiver();

    println!("Watching status reports; Ctrl-C to quit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                match event.context("event bus closed")? {
                    CoreEvent::Controller(ControllerEvent::Status(snapshot)) => {
                        print!(
                            "\r{:<8} MPos {}   ",
                            snapshot.active_state.to_string(),
                            snapshot.mpos
                        );
                    }
                    CoreEvent::Controller(ControllerEvent::Alarm { code, description }) => {
                        println!("\nALARM {}: {}", code, description);
                    }
                    CoreEvent::Connection(grblkit::ConnectionEvent::Closed { reason, .. }) => {
                        println!("\nConnection closed: {:?}", reason);
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }

    controller.disconnect().await?;
    Ok(())
}

async fn wait_for_enter() -> anyhow::Result<()> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    })
    .await?
    .context("reading stdin")
}
