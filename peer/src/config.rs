// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Network configuration.

use crate::error::Error;
use devp2p_core::Keypair;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub p2p: P2pConfig,
    pub node: NodeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub min_peers: usize,
    pub max_peers: usize,
    /// `enode://` URIs dialed at startup.
    pub bootstrap_nodes: Vec<String>,
    /// Client name advertised in the hello exchange.
    pub client_version: String,
}

impl Default for P2pConfig {
    fn default() -> P2pConfig {
        P2pConfig {
            listen_host: "0.0.0.0".into(),
            listen_port: 30303,
            min_peers: 5,
            max_peers: 10,
            bootstrap_nodes: Vec::new(),
            client_version: format!("devp2p/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Raw secret key, hex-encoded in configuration files. A fresh key is
    /// generated when absent. The node id is always derived from this key
    /// and never configured directly.
    #[serde(with = "secret_hex")]
    pub privkey: Option<[u8; 32]>,
}

impl NodeConfig {
    /// The configured keypair, or a freshly generated one.
    pub fn keypair(&self) -> Result<Keypair, Error> {
        match &self.privkey {
            Some(raw) => Keypair::from_secret_bytes(raw).map_err(|_| Error::InvalidPrivateKey),
            None => Ok(Keypair::generate()),
        }
    }
}

mod secret_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::convert::TryInto;

    pub fn serialize<S: Serializer>(
        value: &Option<[u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(raw) => serializer.serialize_some(&hex::encode(raw)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 32]>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            None => Ok(None),
            Some(text) => {
                let raw = hex::decode(&text).map_err(D::Error::custom)?;
                let raw: [u8; 32] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| D::Error::custom("expected 32 bytes of key material"))?;
                Ok(Some(raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devp2p_core::NodeId;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.p2p.listen_host, "0.0.0.0");
        assert_eq!(config.p2p.listen_port, 30303);
        assert_eq!(config.p2p.min_peers, 5);
        assert_eq!(config.p2p.max_peers, 10);
        assert!(config.p2p.bootstrap_nodes.is_empty());
        assert!(config.node.privkey.is_none());
    }

    #[test]
    fn missing_privkey_generates_one() {
        let config = Config::default();
        let a = config.node.keypair().unwrap();
        let b = config.node.keypair().unwrap();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn configured_privkey_pins_the_node_id() {
        let mut config = Config::default();
        config.node.privkey = Some([7u8; 32]);
        let a = config.node.keypair().unwrap();
        let b = config.node.keypair().unwrap();
        assert_eq!(
            NodeId::from_pubkey(a.public()),
            NodeId::from_pubkey(b.public())
        );
    }

    #[test]
    fn rejects_invalid_privkey() {
        let mut config = Config::default();
        config.node.privkey = Some([0u8; 32]);
        assert!(matches!(config.node.keypair(), Err(Error::InvalidPrivateKey)));
    }

    #[test]
    fn serde_round_trip_with_hex_privkey() {
        let text = r#"{
            "p2p": { "listen_port": 30399, "min_peers": 2, "bootstrap_nodes": [] },
            "node": { "privkey": "0707070707070707070707070707070707070707070707070707070707070707" }
        }"#;
        let config: Config = serde_json::from_str(text).unwrap();
        assert_eq!(config.p2p.listen_port, 30399);
        assert_eq!(config.p2p.min_peers, 2);
        assert_eq!(config.p2p.max_peers, 10, "unset fields keep their defaults");
        assert_eq!(config.node.privkey, Some([7u8; 32]));

        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.node.privkey, config.node.privkey);
    }
}
