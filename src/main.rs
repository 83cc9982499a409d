use anyhow::{anyhow, Context};
use embassy_executor::Spawner;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration, Timer};
use log::{error, info};
use std::sync::Arc;
use wordclock_link::simulator::SimulatedWordClock;
use wordclock_link::{
    Birthday, ChannelListener, ClockEvent, ClockEventChannel, ClockRequest, ClockRequestChannel,
    ClockRunner, Color, WordClock, WordClockConfig,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
// Long enough for a prompt round trip and the payload delay
const SETTLE_TIME: Duration = Duration::from_millis(600);

#[embassy_executor::task]
async fn clock_task(mut runner: ClockRunner<SimulatedWordClock, ChannelListener>) {
    runner.run().await;
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting word clock link");

    match run(spawner).await {
        Ok(()) => {
            info!("Session finished");
            std::process::exit(0);
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(spawner: Spawner) -> anyhow::Result<()> {
    let config = load_config()?;
    info!("Using word clock at {}", config.device_address);

    let transport_events = Arc::new(Channel::new());
    let requests: Arc<ClockRequestChannel> = Arc::new(Channel::new());
    let clock_events: Arc<ClockEventChannel> = Arc::new(Channel::new());

    let transport = SimulatedWordClock::new(&config.device_address, Arc::clone(&transport_events))
        .with_birthdays(&[Birthday::new(12, 24)?, Birthday::new(3, 1)?]);
    let device = transport.handle();

    let clock = WordClock::new(transport, ChannelListener::new(Arc::clone(&clock_events)), config);
    let runner = ClockRunner::new(clock, Arc::clone(&requests), transport_events);
    spawner
        .spawn(clock_task(runner))
        .map_err(|e| anyhow!("Failed to spawn clock task: {:?}", e))?;

    requests.send(ClockRequest::Connect).await;
    wait_for(&clock_events, |event| *event == ClockEvent::ConnectionUpdated(true)).await?;
    let birthdays = wait_for_birthdays(&clock_events).await?;
    info!("Birthdays on the clock: {}", format_birthdays(&birthdays));

    requests.send(ClockRequest::SetTime).await;
    Timer::after(SETTLE_TIME).await;
    requests.send(ClockRequest::AddBirthday(Birthday::new(6, 15)?)).await;
    let birthdays = wait_for_birthdays(&clock_events).await?;
    info!("After adding 6/15: {}", format_birthdays(&birthdays));

    requests.send(ClockRequest::SetColor("#ff8800".parse::<Color>()?)).await;
    Timer::after(SETTLE_TIME).await;
    requests.send(ClockRequest::RemoveBirthday(Birthday::new(3, 1)?)).await;
    let birthdays = wait_for_birthdays(&clock_events).await?;
    info!("After removing 3/1: {}", format_birthdays(&birthdays));

    device.with(|state| {
        info!("Clock time: {:?}, color: {:?}", state.time, state.color.map(|c| c.to_hex()));
    });

    requests.send(ClockRequest::Disconnect).await;
    wait_for(&clock_events, |event| *event == ClockEvent::ConnectionUpdated(false)).await?;

    Ok(())
}

fn load_config() -> anyhow::Result<WordClockConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(WordClockConfig::default());
    };

    let json = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    let config = WordClockConfig::from_json(&json).with_context(|| format!("Invalid config in {}", path))?;
    Ok(config)
}

async fn wait_for(
    events: &ClockEventChannel,
    mut matches: impl FnMut(&ClockEvent) -> bool,
) -> anyhow::Result<ClockEvent> {
    loop {
        let event = with_timeout(EVENT_TIMEOUT, events.receive())
            .await
            .map_err(|_| anyhow!("Timed out waiting for the word clock"))?;
        info!("Clock event: {:?}", event);
        if matches(&event) {
            return Ok(event);
        }
    }
}

async fn wait_for_birthdays(events: &ClockEventChannel) -> anyhow::Result<Vec<Birthday>> {
    match wait_for(events, |event| matches!(event, ClockEvent::BirthdaysUpdated(_))).await? {
        ClockEvent::BirthdaysUpdated(birthdays) => Ok(birthdays),
        other => Err(anyhow!("Unexpected event {:?}", other)),
    }
}

fn format_birthdays(birthdays: &[Birthday]) -> String {
    birthdays.iter().map(Birthday::to_string).collect::<Vec<_>>().join(", ")
}

