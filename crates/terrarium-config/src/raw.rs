use serde::Deserialize;

/// Raw YAML representation of `terrarium.yaml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub root: Option<String>,
    pub lkvstore_path: Option<String>,
    pub tofu_binary: Option<String>,
    pub log_level: Option<String>,
    pub api: Option<RawApi>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawApi {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub auth_token: Option<String>,
}
