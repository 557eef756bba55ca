// Keyboard remote: WASD translate, Z/X rotate, R/F stick gain,
// 1/2/3 drive switch up/mid/down, 4/5/6 buffer switch up/mid/down, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use mecanum_chassis_runtime::config::TOPIC_REMOTE;
use mecanum_chassis_runtime::messages::{RemoteSample, SwitchPosition};

const GAINS: [f32; 3] = [0.25, 0.5, 1.0]; // stick deflection
const INPUT_TIMEOUT_MS: u64 = 100; // Center sticks after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_REMOTE).await?;

    info!("Controls: WASD=move, Z/X=rotate, R/F=gain, Q=quit");
    info!("Switches: 1/2/3=drive up/mid/down, 4/5/6=buffer up/mid/down");
    info!("Drive switch DOWN (disabled), gain: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut gain_idx: usize = 0;

    // Start disabled so the base does not move until the operator flips the switch
    let mut sample = RemoteSample {
        sw_r: SwitchPosition::Down,
        ..Default::default()
    };
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let gain = GAINS[gain_idx];

                match code {
                    // Left stick
                    KeyCode::Char('w') if pressed => {
                        sample.ch_lv = gain;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        sample.ch_lv = -gain;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        sample.ch_lh = gain;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        sample.ch_lh = -gain;
                        last_movement_input = Instant::now();
                    }

                    // Right stick vertical
                    KeyCode::Char('z') if pressed => {
                        sample.ch_rv = gain;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        sample.ch_rv = -gain;
                        last_movement_input = Instant::now();
                    }

                    // Gain
                    KeyCode::Char('r') if pressed => {
                        gain_idx = (gain_idx + 1).min(2);
                        print_gain(gain_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        gain_idx = gain_idx.saturating_sub(1);
                        print_gain(gain_idx);
                    }

                    // Switches
                    KeyCode::Char(c @ '1'..='3') if pressed => {
                        sample.sw_r = switch_from_key(c, '1');
                        info!("Drive switch: {:?}", sample.sw_r);
                    }
                    KeyCode::Char(c @ '4'..='6') if pressed => {
                        sample.sw_l = switch_from_key(c, '4');
                        info!("Buffer switch: {:?}", sample.sw_l);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Center sticks if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            sample.ch_lh = 0.0;
            sample.ch_lv = 0.0;
            sample.ch_rh = 0.0;
            sample.ch_rv = 0.0;
        }

        // Always publish at ~50Hz, the runtime treats silence as remote offline
        publisher.put(serde_json::to_string(&sample)?).await?;
    }

    Ok(())
}

fn switch_from_key(key: char, first: char) -> SwitchPosition {
    match key as u32 - first as u32 {
        0 => SwitchPosition::Up,
        1 => SwitchPosition::Mid,
        _ => SwitchPosition::Down,
    }
}

fn print_gain(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Gain: {}", label);
}
