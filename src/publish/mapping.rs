//! Static release -> manifest path table, embedded in the binary.
//! Defines which releases the apply planner may even consider (paired with
//! the env-configured `APPLY_ALLOWLIST` membership check in the planner).

/// (release label, path to the Helm values file in the manifest store).
const MANIFEST_PATHS: &[(&str, &str)] = &[
    ("grafana", "clusters/prod/apps/grafana/values.yaml"),
    ("prometheus", "clusters/prod/apps/prometheus/values.yaml"),
    ("jellyfin", "clusters/prod/apps/jellyfin/values.yaml"),
    ("sonarr", "clusters/prod/apps/sonarr/values.yaml"),
    ("radarr", "clusters/prod/apps/radarr/values.yaml"),
    ("nextcloud", "clusters/prod/apps/nextcloud/values.yaml"),
    ("home-assistant", "clusters/prod/apps/home-assistant/values.yaml"),
];

pub fn path_for(release: &str) -> Option<&'static str> {
    MANIFEST_PATHS.iter().find(|(r, _)| *r == release).map(|(_, path)| *path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_release_maps_to_path() {
        assert_eq!(path_for("grafana"), Some("clusters/prod/apps/grafana/values.yaml"));
    }

    #[test]
    fn unknown_release_has_no_mapping() {
        assert_eq!(path_for("not-a-real-release"), None);
    }
}
