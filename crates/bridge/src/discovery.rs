//! Range sensor discovery by link naming convention.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSensorKind {
    Lidar,
    Sonar,
}

impl RangeSensorKind {
    /// Nominal measurement range in metres.
    pub fn limits_m(self) -> (f64, f64) {
        match self {
            Self::Lidar => (0.06, 35.0),
            Self::Sonar => (0.2, 7.65),
        }
    }
}

/// Link names whose model segment starts with one of `prefixes` and that
/// end in `suffix` are sensors of `kind`.
#[derive(Debug, Clone, Copy)]
pub struct NamingPattern {
    pub kind: RangeSensorKind,
    pub prefixes: &'static [&'static str],
    pub suffix: &'static str,
}

pub const DEFAULT_PATTERNS: &[NamingPattern] = &[
    NamingPattern {
        kind: RangeSensorKind::Lidar,
        prefixes: &["lidar", "sf10a"],
        suffix: "::link",
    },
    NamingPattern {
        kind: RangeSensorKind::Sonar,
        prefixes: &["sonar", "mb1240-xl-ez4"],
        suffix: "::link",
    },
];

impl NamingPattern {
    pub fn matches(&self, link_name: &str) -> bool {
        let Some(scope) = link_name.strip_suffix(self.suffix) else {
            return false;
        };
        scope
            .split("::")
            .any(|segment| self.prefixes.iter().any(|p| segment.starts_with(p)))
    }
}

/// Classify one link name against a pattern table. First match wins.
pub fn match_range_sensor(link_name: &str, patterns: &[NamingPattern]) -> Option<RangeSensorKind> {
    patterns
        .iter()
        .find(|pattern| pattern.matches(link_name))
        .map(|pattern| pattern.kind)
}

/// A link recognised as a range sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSensorLink {
    pub link_name: String,
    pub kind: RangeSensorKind,
}

/// Pick out the range sensor links among `link_names`.
pub fn discover_range_sensors<'a, I>(link_names: I, patterns: &[NamingPattern]) -> Vec<RangeSensorLink>
where
    I: IntoIterator<Item = &'a str>,
{
    link_names
        .into_iter()
        .filter_map(|name| {
            match_range_sensor(name, patterns).map(|kind| RangeSensorLink {
                link_name: name.to_string(),
                kind,
            })
        })
        .collect()
}
