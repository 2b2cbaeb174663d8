use crate::history::{LayerRecord, MISSING_ID};
use crate::synthesizer::RuntimeInfo;
use chrono::DateTime;
use oci_spec::image::ImageConfiguration;

/// History entry of an image configuration, as stored in the config blob.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigHistoryEntry {
    pub created: String,
    pub created_by: String,
    pub comment: Option<String>,
    pub empty_layer: bool,
}

/// Runtime settings from an OCI image configuration.
pub fn runtime_info(config: &ImageConfiguration) -> RuntimeInfo {
    let Some(config_obj) = config.config().as_ref() else {
        return RuntimeInfo::default();
    };

    RuntimeInfo {
        working_dir: config_obj.working_dir().clone().unwrap_or_default(),
        env: config_obj.env().clone().unwrap_or_default(),
        exposed_ports: config_obj
            .exposed_ports()
            .as_ref()
            .map(|ports| ports.iter().cloned().collect())
            .unwrap_or_default(),
        entrypoint: config_obj.entrypoint().clone().unwrap_or_default(),
        cmd: config_obj.cmd().clone().unwrap_or_default(),
    }
}

pub fn config_history(config: &ImageConfiguration) -> Vec<ConfigHistoryEntry> {
    config
        .history()
        .as_ref()
        .map(|hist_vec| {
            hist_vec
                .iter()
                .map(|h| ConfigHistoryEntry {
                    created: h.created().clone().unwrap_or_default(),
                    created_by: h.created_by().clone().unwrap_or_default(),
                    comment: h.comment().clone(),
                    empty_layer: h.empty_layer().unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Seconds since the epoch for an RFC 3339 timestamp; 0 when it does not parse.
pub fn epoch_seconds(created: &str) -> i64 {
    DateTime::parse_from_rfc3339(created)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Pairs config history (oldest-first) with layer ids and returns engine-style
/// records, newest-first.
///
/// Non-empty entries consume `layer_ids` from the end while walking history
/// backwards, so trailing entries without a blob fall back to [`MISSING_ID`].
/// The newest record carries `image_id` and `repo_tags`.
pub fn history_records(
    entries: &[ConfigHistoryEntry],
    layer_ids: &[String],
    image_id: &str,
    repo_tags: &[String],
) -> Vec<LayerRecord> {
    let mut remaining = layer_ids.len();
    let mut records: Vec<LayerRecord> = entries
        .iter()
        .rev()
        .map(|entry| {
            let id = if !entry.empty_layer && remaining > 0 {
                remaining -= 1;
                layer_ids[remaining].clone()
            } else {
                MISSING_ID.to_string()
            };

            LayerRecord {
                id,
                created: epoch_seconds(&entry.created),
                created_by: entry.created_by.clone(),
                tags: Vec::new(),
                size: 0,
                comment: entry.comment.clone().unwrap_or_default(),
            }
        })
        .collect();

    if let Some(newest) = records.first_mut() {
        newest.id = image_id.to_string();
        newest.tags = repo_tags.to_vec();
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(created_by: &str, empty_layer: bool) -> ConfigHistoryEntry {
        ConfigHistoryEntry {
            created: "2023-01-01T00:00:00Z".to_string(),
            created_by: created_by.to_string(),
            comment: None,
            empty_layer,
        }
    }

    fn config_from_json(json: &str) -> ImageConfiguration {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_runtime_info_from_config() {
        let config = config_from_json(
            r#"{
                "architecture": "amd64",
                "os": "linux",
                "config": {
                    "Env": ["PATH=/usr/bin", "HOME=/root"],
                    "Entrypoint": ["docker-entrypoint.sh"],
                    "Cmd": ["nginx", "-g", "daemon off;"],
                    "ExposedPorts": {"80/tcp": {}, "443/tcp": {}},
                    "WorkingDir": "/usr/share/nginx"
                },
                "rootfs": {"type": "layers", "diff_ids": []}
            }"#,
        );

        let info = runtime_info(&config);
        assert_eq!(info.working_dir, "/usr/share/nginx");
        assert_eq!(info.env, vec!["PATH=/usr/bin", "HOME=/root"]);
        assert_eq!(info.entrypoint, vec!["docker-entrypoint.sh"]);
        assert_eq!(info.cmd, vec!["nginx", "-g", "daemon off;"]);
        assert!(info.exposed_ports.contains("80/tcp"));
        assert!(info.exposed_ports.contains("443/tcp"));
    }

    #[test]
    fn test_runtime_info_without_config_section() {
        let config = config_from_json(
            r#"{"architecture": "amd64", "os": "linux", "rootfs": {"type": "layers", "diff_ids": []}}"#,
        );
        assert_eq!(runtime_info(&config), RuntimeInfo::default());
    }

    #[test]
    fn test_epoch_seconds() {
        assert_eq!(epoch_seconds("1970-01-01T00:01:40Z"), 100);
        assert_eq!(epoch_seconds("2023-01-01T00:00:00+01:00"), 1672527600);
        assert_eq!(epoch_seconds("yesterday"), 0);
        assert_eq!(epoch_seconds(""), 0);
    }

    #[test]
    fn test_history_records_pairing() {
        let entries = vec![
            entry("/bin/sh -c #(nop) ADD file:1 in / ", false),
            entry("/bin/sh -c #(nop)  CMD [\"sh\"]", true),
            entry("/bin/sh -c apk add curl", false),
            entry("/bin/sh -c #(nop)  ENV A=b", true),
        ];
        let layers = vec!["sha256:l1".to_string(), "sha256:l2".to_string()];
        let tags = vec!["app:1".to_string()];

        let records = history_records(&entries, &layers, "sha256:img", &tags);

        assert_eq!(records.len(), 4);
        // newest first
        assert_eq!(records[0].created_by, "/bin/sh -c #(nop)  ENV A=b");
        assert_eq!(records[0].id, "sha256:img");
        assert_eq!(records[0].tags, tags);
        assert_eq!(records[1].id, "sha256:l2");
        assert_eq!(records[2].id, MISSING_ID);
        assert_eq!(records[3].id, "sha256:l1");
        assert!(records[1..].iter().all(|r| r.tags.is_empty()));
        assert!(records.iter().all(|r| r.created == 1672531200));
    }

    #[test]
    fn test_history_records_empty() {
        assert!(history_records(&[], &[], "sha256:img", &[]).is_empty());
    }
}
