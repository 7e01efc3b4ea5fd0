//! Pub/sub walkthrough against a local broker.
//!
//! Start a broker first, e.g.:
//!
//! ```bash
//! docker run -p 1883:1883 eclipse-mosquitto
//! cargo run --example session_demo
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mqtt_session::{RumqttcTransport, Session, SessionConfig};

fn main() -> mqtt_session::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = SessionConfig {
        client_id: "session-demo".into(),
        ..Default::default()
    };
    let transport = Arc::new(RumqttcTransport::new(&config));
    let session = Session::open(transport, "localhost:1883", config)?;
    println!("session {} connected", session.id());

    let sub = session.subscribe("demo/+/reading", |topic, payload| {
        println!("<- {topic}: {}", String::from_utf8_lossy(payload));
    })?;

    for i in 0..5 {
        let payload = format!("{{\"sample\": {i}}}");
        session.publish_raw("demo/sensor1/reading", 1, false, payload.as_bytes())?;
        println!("-> demo/sensor1/reading: {payload}");
        thread::sleep(Duration::from_millis(500));
    }

    // Clear any retained state and shut down
    session.publish_empty("demo/sensor1/reading", 1, true)?;
    sub.unsubscribe()?;
    session.close()?;
    println!("session closed");
    Ok(())
}
