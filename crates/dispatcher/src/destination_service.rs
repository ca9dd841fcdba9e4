use std::collections::HashMap;

use fleet_core::DestinationConfig;

/// 投放目标查询，例如把版块名称解析为版块ID
pub struct DestinationService {
    destinations: HashMap<String, DestinationConfig>,
}

impl DestinationService {
    pub fn new(destinations: HashMap<String, DestinationConfig>) -> Self {
        Self { destinations }
    }

    pub fn resolve(&self, name: &str) -> Option<&DestinationConfig> {
        self.destinations.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let mut map = HashMap::new();
        map.insert(
            "tech".to_string(),
            DestinationConfig {
                section_id: "42".to_string(),
                url: None,
                display_name: Some("技术区".to_string()),
            },
        );
        let service = DestinationService::new(map);

        assert_eq!(service.resolve("tech").unwrap().section_id, "42");
        assert!(service.resolve("unknown").is_none());
    }
}
