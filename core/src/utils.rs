use rand::{thread_rng, Rng};
use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt::format, layer::SubscriberExt, EnvFilter, FmtSubscriber};

/// Fraction by which [`with_jitter`] may stretch or shrink a duration.
const JITTER: f64 = 0.1;

pub fn spawn_in_span<F>(future: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tokio::spawn(future.in_current_span())
}

/// Randomizes `duration` by up to 10% in either direction.
pub fn with_jitter(duration: Duration) -> Duration {
	let factor = thread_rng().gen_range((1.0 - JITTER)..=(1.0 + JITTER));
	duration.mul_f64(factor)
}

/// Current unix time in seconds.
pub fn unix_now() -> u32 {
	chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

fn env_filter(log_level: Level) -> EnvFilter {
	EnvFilter::new(format!("ton_relayer_core={log_level},warn"))
}

pub fn json_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	FmtSubscriber::builder()
		.json()
		.with_env_filter(env_filter(log_level))
		.with_span_events(format::FmtSpan::CLOSE)
		.finish()
		.with(ErrorLayer::default())
}

pub fn default_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	FmtSubscriber::builder()
		.with_env_filter(env_filter(log_level))
		.with_span_events(format::FmtSpan::CLOSE)
		.finish()
		.with(ErrorLayer::default())
}
