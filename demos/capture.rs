use std::{sync::Arc, time::Duration};

use futures::{executor::block_on, StreamExt};
use uvcgrab::{Capture, CaptureEvent, ChannelSink, Config, LibUsb};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (sink, mut events) = ChannelSink::new();
    let backend = LibUsb::new()?.with_transfer_timeout(Duration::from_secs(2));
    let mut capture = Capture::new(backend, Arc::new(sink), Config::default());

    let device = capture.find_device()?;
    println!(
        "using {:?} {:04x}:{:04x}",
        device.id(),
        device.vendor_id(),
        device.product_id()
    );
    capture.request_permission(&device).wait()?;
    capture.open_device(device)?;

    println!("capture started");

    let mut frames = 0;
    block_on(async {
        while let Some(event) = events.next().await {
            match event {
                CaptureEvent::Frame(frame) => {
                    frames += 1;
                    println!("frame {}: {}x{}", frames, frame.width(), frame.height());
                    if frames == 100 {
                        break;
                    }
                }
                CaptureEvent::Failed(e) => {
                    eprintln!("capture failed: {}", e);
                    break;
                }
            }
        }
    });

    capture.release_session()?;
    Ok(())
}
