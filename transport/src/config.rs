//! Frozen connection configuration (spec §6 "Configuration options").
//!
//! Built through [`ConfigBuilder`] and consumed by value, the way
//! `Wireguard::init` is handed its already-resolved keys rather than a mutable
//! settings object.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreliableSizeBehaviour {
	NormalFragmentation,
	DropAboveMtu,
	IgnoreMtu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
	MissingAppIdentifier,
	MtuOutOfRange,
	ConnectionTimeoutBelowPingInterval,
}

/// Every key from spec §6. Fields marked "Locked after `Start()`" in the spec are simply never
/// mutated post-construction — there is no setter, so the lock is enforced by the type itself.
#[derive(Debug, Clone)]
pub struct Config {
	pub app_identifier: String,

	pub local_address: Option<SocketAddr>,
	pub broadcast_address: Option<SocketAddr>,
	pub port: u16,
	pub dual_stack: bool,

	pub maximum_connections: usize,
	pub maximum_transmission_unit: u16,
	pub auto_expand_mtu: bool,
	pub expand_mtu_frequency: Duration,
	pub expand_mtu_fail_attempts: u32,
	pub expand_mtu_step: usize,

	pub ping_interval: Duration,
	pub connection_timeout: Duration,
	pub resend_handshake_interval: Duration,
	pub maximum_handshake_attempts: u32,
	pub min_resend_delay: Duration,

	pub receive_buffer_size: usize,
	pub send_buffer_size: usize,

	pub unreliable_size_behaviour: UnreliableSizeBehaviour,

	pub accept_incoming_connections: bool,
	pub auto_flush_send_queue: bool,
	pub enable_upnp: bool,
	pub use_message_recycling: bool,

	pub disabled_message_types: u32,

	pub loss: f64,
	pub duplicates: f64,
	pub min_latency: Duration,
	pub random_latency: Duration,

	pub network_thread_name: String,
}

impl Config {
	#[must_use]
	pub fn builder(app_identifier: String) -> ConfigBuilder {
		ConfigBuilder::new(app_identifier)
	}
}

/// Mutable staging area; `build()` validates and freezes into a [`Config`].
pub struct ConfigBuilder {
	cfg: Config,
}

impl ConfigBuilder {
	#[must_use]
	pub fn new(app_identifier: String) -> Self {
		Self {
			cfg: Config {
				app_identifier,
				local_address: None,
				broadcast_address: None,
				port: 0,
				dual_stack: false,
				maximum_connections: 256,
				maximum_transmission_unit: 1408,
				auto_expand_mtu: false,
				expand_mtu_frequency: Duration::from_secs(2),
				expand_mtu_fail_attempts: 5,
				expand_mtu_step: 128,
				ping_interval: Duration::from_secs(4),
				connection_timeout: Duration::from_secs(25),
				resend_handshake_interval: Duration::from_millis(500),
				maximum_handshake_attempts: 10,
				min_resend_delay: Duration::from_millis(100),
				receive_buffer_size: 1024 * 1024,
				send_buffer_size: 1024 * 1024,
				unreliable_size_behaviour: UnreliableSizeBehaviour::NormalFragmentation,
				accept_incoming_connections: true,
				auto_flush_send_queue: true,
				enable_upnp: false,
				use_message_recycling: true,
				disabled_message_types: 0,
				loss: 0.0,
				duplicates: 0.0,
				min_latency: Duration::ZERO,
				random_latency: Duration::ZERO,
				network_thread_name: "transport".into(),
			},
		}
	}

	#[must_use]
	pub fn port(mut self, port: u16) -> Self {
		self.cfg.port = port;
		self
	}

	#[must_use]
	pub fn local_address(mut self, addr: SocketAddr) -> Self {
		self.cfg.local_address = Some(addr);
		self
	}

	#[must_use]
	pub fn broadcast_address(mut self, addr: SocketAddr) -> Self {
		self.cfg.broadcast_address = Some(addr);
		self
	}

	#[must_use]
	pub fn dual_stack(mut self, enabled: bool) -> Self {
		self.cfg.dual_stack = enabled;
		self
	}

	#[must_use]
	pub fn maximum_connections(mut self, n: usize) -> Self {
		self.cfg.maximum_connections = n;
		self
	}

	#[must_use]
	pub fn maximum_transmission_unit(mut self, mtu: u16) -> Self {
		self.cfg.maximum_transmission_unit = mtu;
		self
	}

	#[must_use]
	pub fn auto_expand_mtu(mut self, enabled: bool) -> Self {
		self.cfg.auto_expand_mtu = enabled;
		self
	}

	#[must_use]
	pub fn ping_interval(mut self, interval: Duration) -> Self {
		self.cfg.ping_interval = interval;
		self
	}

	#[must_use]
	pub fn connection_timeout(mut self, timeout: Duration) -> Self {
		self.cfg.connection_timeout = timeout;
		self
	}

	#[must_use]
	pub fn accept_incoming_connections(mut self, accept: bool) -> Self {
		self.cfg.accept_incoming_connections = accept;
		self
	}

	#[must_use]
	pub fn use_message_recycling(mut self, enabled: bool) -> Self {
		self.cfg.use_message_recycling = enabled;
		self
	}

	#[must_use]
	pub fn unreliable_size_behaviour(mut self, behaviour: UnreliableSizeBehaviour) -> Self {
		self.cfg.unreliable_size_behaviour = behaviour;
		self
	}

	#[must_use]
	pub fn simulate_network(mut self, loss: f64, duplicates: f64, min_latency: Duration, random_latency: Duration) -> Self {
		self.cfg.loss = loss.clamp(0.0, 1.0);
		self.cfg.duplicates = duplicates.clamp(0.0, 1.0);
		self.cfg.min_latency = min_latency;
		self.cfg.random_latency = random_latency;
		self
	}

	#[must_use]
	pub fn network_thread_name(mut self, name: String) -> Self {
		self.cfg.network_thread_name = name;
		self
	}

	pub fn build(self) -> Result<Config, ConfigError> {
		let cfg = self.cfg;

		if cfg.app_identifier.is_empty() {
			return Err(ConfigError::MissingAppIdentifier);
		}

		if cfg.maximum_transmission_unit == 0 || cfg.maximum_transmission_unit > 8191 {
			return Err(ConfigError::MtuOutOfRange);
		}

		if cfg.connection_timeout < cfg.ping_interval {
			return Err(ConfigError::ConnectionTimeoutBelowPingInterval);
		}

		Ok(cfg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_app_identifier() {
		let err = Config::builder(String::new()).build().unwrap_err();
		assert_eq!(err, ConfigError::MissingAppIdentifier);
	}

	#[test]
	fn rejects_timeout_below_ping_interval() {
		let err = Config::builder("app/1".into())
			.ping_interval(Duration::from_secs(10))
			.connection_timeout(Duration::from_secs(1))
			.build()
			.unwrap_err();
		assert_eq!(err, ConfigError::ConnectionTimeoutBelowPingInterval);
	}

	#[test]
	fn defaults_build_successfully() {
		let cfg = Config::builder("app/1".into()).build().unwrap();
		assert_eq!(cfg.maximum_transmission_unit, 1408);
	}
}
