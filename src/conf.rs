use crate::catalog::Scope;
use crate::stream::DEFAULT_JPEG_QUALITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conf {
	pub version: u8,
	/// Listen address for the stream/status server
	pub listen: String,
	pub jpeg_quality: i32,
	/// Backend web application; enables the remote encoding store
	pub backend_url: Option<String>,
	/// Forward presence events to the backend (requires backend_url)
	pub notify_backend: bool,
	pub scopes: BTreeMap<String, Scope>,
}

impl ::std::default::Default for Conf {
	fn default() -> Self {
		let mut scopes = BTreeMap::new();
		scopes.insert(
			"aiml".to_owned(),
			Scope {
				id: "aiml".to_owned(),
				name: "CSE AIML".to_owned(),
				prefix: "23CSEAIML".to_owned(),
				start: 1,
				end: 90,
			},
		);

		Self {
			version: 0,
			listen: "127.0.0.1:8090".to_owned(),
			jpeg_quality: DEFAULT_JPEG_QUALITY,
			backend_url: None,
			notify_backend: false,
			scopes,
		}
	}
}

impl Conf {
	pub fn scope(&self, id: &str) -> Option<&Scope> {
		self.scopes.get(id)
	}
}

pub fn load_config() -> Result<Conf> {
	confy::load("adsum", None).context("loading configuration")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_carry_one_scope_and_stream_quality() {
		let cfg = Conf::default();
		assert_eq!(cfg.jpeg_quality, DEFAULT_JPEG_QUALITY);
		assert!(cfg.backend_url.is_none());

		let scope = cfg.scope("aiml").expect("default scope");
		assert!(scope.matches("23CSEAIML042"));
		assert!(cfg.scope("missing").is_none());
	}
}
