//! `orc config get|set|validate` (§6). Thin wrapper over
//! `config::OrcToml` — `get` without a key prints the whole file,
//! `set` accepts a handful of known dotted keys since `OrcToml` isn't
//! a free-form map.

use crate::config::{AutomationProfile, OrcConfig, OrcToml};
use crate::errors::OrcError;
use crate::store::models::GateType;

/// `orc config get [key]`: the whole resolved config, or one field.
pub fn get(config: &OrcConfig, key: Option<&str>) -> Result<String, OrcError> {
    match key {
        None => serde_yaml::to_string(&config.toml).map_err(|e| OrcError::Other(e.into())),
        Some(key) => get_field(&config.toml, key),
    }
}

fn get_field(toml: &OrcToml, key: &str) -> Result<String, OrcError> {
    Ok(match key {
        "defaults.profile" => format!("{:?}", toml.defaults.profile).to_lowercase(),
        "defaults.default_weight" => toml.defaults.default_weight.clone(),
        "defaults.grace_period_secs" => toml.defaults.grace_period_secs.to_string(),
        "defaults.store_timeout_secs" => toml.defaults.store_timeout_secs.to_string(),
        "defaults.agent_cmd" => toml.defaults.agent_cmd.clone(),
        "defaults.worktree_root" => toml
            .defaults
            .worktree_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        other => return Err(OrcError::InvalidArgs(format!("unknown config key '{other}'"))),
    })
}

/// `orc config set <key> <value>`: writes through to `config.yaml`
/// immediately.
pub fn set(config: &mut OrcConfig, key: &str, value: &str) -> Result<(), OrcError> {
    match key {
        "defaults.profile" => {
            config.toml.defaults.profile = parse_profile(value)?;
        }
        "defaults.default_weight" => {
            crate::store::models::Weight::from_str(value).map_err(OrcError::InvalidArgs)?;
            config.toml.defaults.default_weight = value.to_string();
        }
        "defaults.grace_period_secs" => {
            config.toml.defaults.grace_period_secs =
                value.parse().map_err(|_| OrcError::InvalidArgs(format!("'{value}' is not a valid integer")))?;
        }
        "defaults.store_timeout_secs" => {
            config.toml.defaults.store_timeout_secs =
                value.parse().map_err(|_| OrcError::InvalidArgs(format!("'{value}' is not a valid integer")))?;
        }
        "defaults.agent_cmd" => {
            config.toml.defaults.agent_cmd = value.to_string();
        }
        "defaults.gate_type" => {
            config.toml.defaults.gate_type = Some(GateType::from_str(value).map_err(OrcError::InvalidArgs)?);
        }
        "defaults.worktree_root" => {
            config.toml.defaults.worktree_root = Some(std::path::PathBuf::from(value));
        }
        other => return Err(OrcError::InvalidArgs(format!("unknown config key '{other}'"))),
    }
    config
        .toml
        .save(&config.sentinel.config_path())
        .map_err(OrcError::Other)?;
    Ok(())
}

fn parse_profile(value: &str) -> Result<AutomationProfile, OrcError> {
    match value.to_lowercase().as_str() {
        "auto" => Ok(AutomationProfile::Auto),
        "fast" => Ok(AutomationProfile::Fast),
        "safe" => Ok(AutomationProfile::Safe),
        "strict" => Ok(AutomationProfile::Strict),
        other => Err(OrcError::InvalidArgs(format!("unknown automation profile '{other}'"))),
    }
}

/// `orc config validate`: delegates to `OrcToml::validate`, returning
/// its list of problems (empty means the config is sound).
pub fn validate(config: &OrcConfig) -> Vec<String> {
    config.toml.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_and_get_round_trip_a_known_key() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".orc")).unwrap();
        let mut config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        set(&mut config, "defaults.agent_cmd", "my-claude").unwrap();
        assert_eq!(get_field(&config.toml, "defaults.agent_cmd").unwrap(), "my-claude");

        let reloaded = OrcToml::load(&config.sentinel.config_path()).unwrap();
        assert_eq!(reloaded.defaults.agent_cmd, "my-claude");
    }

    #[test]
    fn set_rejects_unknown_key() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".orc")).unwrap();
        let mut config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            set(&mut config, "defaults.bogus", "x"),
            Err(OrcError::InvalidArgs(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_weight() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".orc")).unwrap();
        let mut config = OrcConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            set(&mut config, "defaults.default_weight", "huge"),
            Err(OrcError::InvalidArgs(_))
        ));
    }
}
