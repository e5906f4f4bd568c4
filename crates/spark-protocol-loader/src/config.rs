//! # config：协议装载配置
//!
//! ## 核心意图（Why）
//! - 启动期由运维配置给出“模块名（可选）、协议名、端口、参数串、是否需要 TLS”的元组列表；
//! - 列表顺序即注册顺序，也就决定了每个端口候选列表的匹配优先级。
//!
//! ## 格式（What）
//! ```toml
//! server_name = "xrootd"
//! default_port = 1094
//!
//! [[protocols]]
//! name = "xroot"
//!
//! [[protocols]]
//! name = "https"
//! module = "libXrdHttp.so"
//! port = 8443
//! tls = true
//! params = "-cert /etc/grid-security/hostcert.pem"
//! ```

use std::{fs, path::Path};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    protocol::ProtocolConfig,
    registry::{PROTO_LIMIT, PROTO_MAX, Registration},
};

fn default_server_name() -> String {
    "spark".to_owned()
}

fn default_proto_max() -> usize {
    PROTO_MAX
}

fn default_port() -> i32 {
    -1
}

/// 装载器配置根。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// 协议未指定端口时使用；负值表示“由协议自行决定”。
    #[serde(default = "default_port")]
    pub default_port: i32,
    /// 注册表容量，取值 `1..=PROTO_LIMIT`。
    #[serde(default = "default_proto_max")]
    pub proto_max: usize,
    #[serde(default)]
    pub protocols: Vec<ProtocolDirective>,
}

/// 单条协议指令。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProtocolDirective {
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub tls: bool,
}

impl LoaderConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取配置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 语义校验。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proto_max == 0 {
            return Err(invalid("proto_max must be at least 1"));
        }
        if self.proto_max > PROTO_LIMIT {
            return Err(invalid(format!(
                "proto_max {} exceeds the limit of {PROTO_LIMIT}",
                self.proto_max
            )));
        }
        if self.protocols.len() > self.proto_max {
            return Err(invalid(format!(
                "{} protocols configured but proto_max is {}",
                self.protocols.len(),
                self.proto_max
            )));
        }
        check_port("default_port", self.default_port)?;
        for directive in &self.protocols {
            if directive.name.trim().is_empty() {
                return Err(invalid("protocol name must not be empty"));
            }
            if matches!(&directive.module, Some(module) if module.trim().is_empty()) {
                return Err(invalid(format!(
                    "protocol `{}` has an empty module name",
                    directive.name
                )));
            }
            if let Some(port) = directive.port {
                check_port(&directive.name, port)?;
            }
        }
        Ok(())
    }

    /// 某条指令对应的共享配置块：指令端口优先于 `default_port`。
    pub fn protocol_config(&self, directive: &ProtocolDirective) -> ProtocolConfig {
        ProtocolConfig::new(
            directive.port.unwrap_or(self.default_port),
            self.server_name.as_str(),
        )
    }
}

impl ProtocolDirective {
    /// 转为注册请求。
    pub fn registration<'a>(&'a self, config: &'a ProtocolConfig) -> Registration<'a> {
        Registration {
            module: self.module.as_deref(),
            name: &self.name,
            params: &self.params,
            config,
            requires_tls: self.tls,
        }
    }
}

fn check_port(what: &str, port: i32) -> Result<(), ConfigError> {
    if (-1..=i32::from(u16::MAX)).contains(&port) {
        Ok(())
    } else {
        Err(invalid(format!("{what}: port {port} is out of range")))
    }
}

fn invalid(detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        detail: detail.into(),
    }
}
