//! Settings schema: per-path type, default, and constraint.
//!
//! Each plugin contributes a fragment (a [`Settings`] whose top-level keys
//! are its sections); the daemon merges every fragment plus its own into
//! the authoritative schema for one generation. Plugins are expected to use
//! disjoint section names, so collisions other than container/container and
//! mode/mode resolve to the later fragment.
//!
//! ```yaml
//! controllers:
//!   type: container
//!   children:
//!     gyro_scaling: { type: int, min: 1, max: 100, default: 40 }
//!     xinput:
//!       type: mode
//!       default: ds5e
//!       modes:
//!         disabled: { type: container }
//!         ds5e:
//!           type: container
//!           children:
//!             led_support: { type: bool, default: true }
//! ```
//!
//! A `mode` stores its selection at `<path>.mode` and each mode's subtree at
//! `<path>.<mode name>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::config::Config;
use crate::error::ValidationError;

pub type Section = BTreeMap<String, Setting>;

/// One node of the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(flatten)]
    pub kind: SettingKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    Container {
        #[serde(default)]
        children: Section,
    },
    Mode {
        #[serde(default)]
        modes: Section,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Bool {
        #[serde(default)]
        default: Option<bool>,
    },
    Int {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        default: Option<i64>,
    },
    Float {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        default: Option<f64>,
    },
    /// One key out of `options` (key → display label).
    Multiple {
        options: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },
    /// One value out of a fixed list.
    Discrete {
        options: Vec<Value>,
        #[serde(default)]
        default: Option<Value>,
    },
    Action,
    /// Read-only value published by a plugin.
    Display {
        #[serde(default)]
        default: Option<Value>,
    },
    Custom {
        #[serde(default)]
        default: Option<Value>,
    },
}

impl Setting {
    pub fn new(kind: SettingKind) -> Self {
        Self {
            title: None,
            hint: None,
            kind,
        }
    }

    pub fn container(children: Section) -> Self {
        Self::new(SettingKind::Container { children })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A merged schema, or one plugin's fragment of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Section);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if crate::config::is_blank_yaml(text) {
            return Ok(Self::new());
        }
        let section: Option<Section> = serde_yaml::from_str(text)?;
        Ok(Self(section.unwrap_or_default()))
    }

    /// A fragment holding a single top-level section.
    pub fn section(name: impl Into<String>, setting: Setting) -> Self {
        Self(BTreeMap::from([(name.into(), setting)]))
    }

    pub fn sections(&self) -> &Section {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge fragments in order; later fragments win on non-container collisions.
    pub fn merge<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Settings>,
    {
        let mut merged = Section::new();
        for fragment in fragments {
            merge_section(&mut merged, fragment.0);
        }
        Self(merged)
    }

    /// Every value-carrying path declared by the schema, in a stable order.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        walk_section(&self.0, "", false, &mut out);
        out
    }

    /// Like [`Settings::leaves`], plus one entry per container and mode node
    /// placed ahead of its descendants.
    pub fn rules(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        walk_section(&self.0, "", true, &mut out);
        out
    }

    /// A Config holding every declared default.
    pub fn defaults(&self) -> Config {
        let mut conf = Config::new();
        for leaf in self.leaves() {
            if let Some(value) = leaf.rule.default_value() {
                // Declared paths form a tree, so no parent is ever a scalar here.
                let _ = conf.set(&leaf.path, value);
            }
        }
        conf
    }

    /// Copy of `conf` restricted to the paths this schema declares.
    pub fn project(&self, conf: &Config) -> Config {
        let mut out = Config::new();
        for leaf in self.leaves() {
            if let Some(value) = conf.get(&leaf.path) {
                let _ = out.set(&leaf.path, value.clone());
            }
        }
        out
    }
}

fn merge_section(into: &mut Section, from: Section) {
    for (key, incoming) in from {
        match into.get_mut(&key) {
            Some(existing) => merge_setting(existing, incoming),
            None => {
                into.insert(key, incoming);
            }
        }
    }
}

fn merge_setting(existing: &mut Setting, incoming: Setting) {
    match (&mut existing.kind, incoming.kind) {
        (SettingKind::Container { children }, SettingKind::Container { children: more }) => {
            merge_section(children, more)
        }
        (SettingKind::Mode { modes, .. }, SettingKind::Mode { modes: more, .. }) => {
            merge_section(modes, more)
        }
        (slot, kind) => {
            *slot = kind;
            existing.title = incoming.title;
            existing.hint = incoming.hint;
        }
    }
}

/// A single declared path and the rule its value must satisfy.
#[derive(Debug, Clone)]
pub struct Leaf<'a> {
    pub path: String,
    pub rule: Rule<'a>,
}

#[derive(Debug, Clone, Copy)]
pub enum Rule<'a> {
    /// `<mode path>.mode`: must name one of `modes`.
    ModeSelector {
        modes: &'a Section,
        default: Option<&'a str>,
    },
    Value(&'a SettingKind),
}

impl Rule<'_> {
    pub fn default_value(&self) -> Option<Value> {
        match *self {
            Rule::ModeSelector { modes, default } => default
                .or_else(|| modes.keys().next().map(String::as_str))
                .map(|mode| Value::String(mode.to_owned())),
            Rule::Value(kind) => match kind {
                SettingKind::Bool { default } => default.map(Value::Bool),
                SettingKind::Int { default, .. } => default.map(Value::from),
                SettingKind::Float { default, .. } => default.map(Value::from),
                SettingKind::Multiple { default, .. } => default.clone().map(Value::String),
                SettingKind::Action => Some(Value::Bool(false)),
                SettingKind::Discrete { default, .. }
                | SettingKind::Display { default }
                | SettingKind::Custom { default } => default.clone(),
                SettingKind::Container { .. } | SettingKind::Mode { .. } => None,
            },
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        match *self {
            Rule::ModeSelector { modes, .. } => match value.as_str() {
                Some(mode) if modes.contains_key(mode) => Ok(()),
                _ => Err(format!(
                    "expected one of the modes [{}]",
                    modes.keys().cloned().collect::<Vec<_>>().join(", ")
                )),
            },
            Rule::Value(kind) => check_kind(kind, value),
        }
    }
}

fn check_kind(kind: &SettingKind, value: &Value) -> Result<(), String> {
    match kind {
        SettingKind::Bool { .. } | SettingKind::Action => {
            if value.is_bool() {
                Ok(())
            } else {
                Err("expected a boolean".to_string())
            }
        }
        SettingKind::Int { min, max, .. } => {
            let n = value
                .as_i64()
                .ok_or_else(|| "expected an integer".to_string())?;
            check_range(n, *min, *max)
        }
        SettingKind::Float { min, max, .. } => {
            let n = value
                .as_f64()
                .ok_or_else(|| "expected a number".to_string())?;
            if (min.is_some() || max.is_some()) && !n.is_finite() {
                return Err(format!("{n} is not a finite number"));
            }
            check_range(n, *min, *max)
        }
        SettingKind::Multiple { options, .. } => match value.as_str() {
            Some(choice) if options.contains_key(choice) => Ok(()),
            _ => Err(format!(
                "expected one of [{}]",
                options.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
        },
        SettingKind::Discrete { options, .. } => {
            if options.contains(value) {
                Ok(())
            } else {
                Err("not one of the allowed values".to_string())
            }
        }
        SettingKind::Container { .. } | SettingKind::Mode { .. } => {
            if value.is_mapping() {
                Ok(())
            } else {
                Err("expected a mapping".to_string())
            }
        }
        SettingKind::Display { .. } | SettingKind::Custom { .. } => Ok(()),
    }
}

fn check_range<T>(n: T, min: Option<T>, max: Option<T>) -> Result<(), String>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if let Some(min) = min {
        if n < min {
            return Err(format!("{n} is below the minimum {min}"));
        }
    }
    if let Some(max) = max {
        if n > max {
            return Err(format!("{n} is above the maximum {max}"));
        }
    }
    Ok(())
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

fn walk_section<'a>(section: &'a Section, prefix: &str, nodes: bool, out: &mut Vec<Leaf<'a>>) {
    for (name, setting) in section {
        walk_setting(setting, join_path(prefix, name), nodes, out);
    }
}

fn walk_setting<'a>(
    setting: &'a Setting,
    path: String,
    nodes: bool,
    out: &mut Vec<Leaf<'a>>,
) {
    let kind = &setting.kind;
    if nodes && matches!(kind, SettingKind::Container { .. } | SettingKind::Mode { .. }) {
        out.push(Leaf {
            path: path.clone(),
            rule: Rule::Value(kind),
        });
    }
    match kind {
        SettingKind::Container { children } => walk_section(children, &path, nodes, out),
        SettingKind::Mode { modes, default } => {
            out.push(Leaf {
                path: join_path(&path, "mode"),
                rule: Rule::ModeSelector {
                    modes,
                    default: default.as_deref(),
                },
            });
            walk_section(modes, &path, nodes, out);
        }
        kind => out.push(Leaf {
            path,
            rule: Rule::Value(kind),
        }),
    }
}

/// Check `conf` against `settings`.
///
/// Declared paths missing from `conf` receive their default when
/// `use_defaults` is set and are left absent otherwise. A present value that
/// violates its declaration fails the whole call, as does a present container
/// or mode that is not a mapping. Paths the schema does not declare are
/// ignored.
pub fn validate_config(
    conf: &mut Config,
    settings: &Settings,
    use_defaults: bool,
) -> Result<(), ValidationError> {
    for leaf in settings.rules() {
        match conf.get(&leaf.path) {
            Some(value) => leaf
                .rule
                .check(value)
                .map_err(|reason| ValidationError::new(&leaf.path, reason))?,
            None if use_defaults => {
                if let Some(default) = leaf.rule.default_value() {
                    conf.set(&leaf.path, default)
                        .map_err(|err| ValidationError::new(&leaf.path, err.to_string()))?;
                }
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROLLERS: &str = r#"
controllers:
  type: container
  children:
    legion_go:
      type: container
      title: Legion Go
      children:
        gyro_scaling: { type: int, min: 1, max: 100, default: 40 }
        deadzone: { type: float, min: 0.0, max: 0.5, default: 0.1 }
        swap_legion:
          type: multiple
          options: { disabled: Disabled, l_is_start: Left is start }
          default: disabled
        xinput:
          type: mode
          default: ds5e
          modes:
            disabled: { type: container }
            ds5e:
              type: container
              children:
                led_support: { type: bool, default: true }
        shortcuts: { type: action }
        version: { type: display }
"#;

    fn controllers() -> Settings {
        Settings::from_yaml(CONTROLLERS).expect("valid schema")
    }

    #[test]
    fn parses_every_kind() {
        let settings = controllers();
        let paths: Vec<_> = settings.leaves().into_iter().map(|l| l.path).collect();
        assert_eq!(
            paths,
            vec![
                "controllers.legion_go.deadzone",
                "controllers.legion_go.gyro_scaling",
                "controllers.legion_go.shortcuts",
                "controllers.legion_go.swap_legion",
                "controllers.legion_go.version",
                "controllers.legion_go.xinput.mode",
                "controllers.legion_go.xinput.ds5e.led_support",
            ]
        );
    }

    #[test]
    fn strict_validation_fills_defaults() {
        let mut conf = Config::new();
        validate_config(&mut conf, &controllers(), true).unwrap();

        assert_eq!(conf.to::<i64>("controllers.legion_go.gyro_scaling").unwrap(), 40);
        assert_eq!(
            conf.to::<String>("controllers.legion_go.xinput.mode").unwrap(),
            "ds5e"
        );
        assert!(conf
            .to::<bool>("controllers.legion_go.xinput.ds5e.led_support")
            .unwrap());
        assert!(!conf.to::<bool>("controllers.legion_go.shortcuts").unwrap());
        assert!(!conf.contains("controllers.legion_go.version"), "no default declared");
    }

    #[test]
    fn lenient_validation_leaves_missing_paths_absent() {
        let mut conf = Config::new();
        conf.set("controllers.legion_go.gyro_scaling", 10).unwrap();
        validate_config(&mut conf, &controllers(), false).unwrap();

        assert_eq!(conf.to::<i64>("controllers.legion_go.gyro_scaling").unwrap(), 10);
        assert!(!conf.contains("controllers.legion_go.xinput.mode"));
    }

    #[test]
    fn out_of_range_int_is_rejected() {
        let mut conf = Config::new();
        conf.set("controllers.legion_go.gyro_scaling", 1000).unwrap();
        let err = validate_config(&mut conf, &controllers(), true).unwrap_err();
        assert_eq!(err.path, "controllers.legion_go.gyro_scaling");
        assert!(err.reason.contains("maximum"), "reason: {}", err.reason);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut conf = Config::new();
        conf.set("controllers.legion_go.xinput.mode", "xbox_elite").unwrap();
        let err = validate_config(&mut conf, &controllers(), false).unwrap_err();
        assert_eq!(err.path, "controllers.legion_go.xinput.mode");
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut conf = Config::new();
        conf.set("controllers.legion_go.xinput.ds5e.led_support", "yes")
            .unwrap();
        assert!(validate_config(&mut conf, &controllers(), false).is_err());

        let mut conf = Config::new();
        conf.set("controllers.legion_go.swap_legion", "r_is_start").unwrap();
        assert!(validate_config(&mut conf, &controllers(), false).is_err());
    }

    #[test]
    fn rules_place_nodes_ahead_of_their_children() {
        let settings = controllers();
        let paths: Vec<_> = settings.rules().into_iter().map(|l| l.path).collect();
        let at = |path: &str| paths.iter().position(|p| p == path).unwrap();

        assert_eq!(paths[0], "controllers");
        assert!(at("controllers.legion_go") < at("controllers.legion_go.deadzone"));
        assert!(at("controllers.legion_go.xinput") < at("controllers.legion_go.xinput.mode"));
        assert!(
            at("controllers.legion_go.xinput.ds5e")
                < at("controllers.legion_go.xinput.ds5e.led_support")
        );
        assert!(paths.contains(&"controllers.legion_go.xinput.disabled".to_string()));
    }

    #[test]
    fn scalar_in_place_of_container_is_rejected_at_the_node() {
        for use_defaults in [true, false] {
            let mut conf = Config::new();
            conf.set("controllers", 3).unwrap();
            let err = validate_config(&mut conf, &controllers(), use_defaults).unwrap_err();
            assert_eq!(err.path, "controllers");
            assert_eq!(err.reason, "expected a mapping");

            let mut conf = Config::new();
            conf.set("controllers.legion_go.xinput", "ds5e").unwrap();
            let err = validate_config(&mut conf, &controllers(), use_defaults).unwrap_err();
            assert_eq!(err.path, "controllers.legion_go.xinput");
        }
    }

    #[test]
    fn container_without_defaults_still_needs_a_mapping() {
        let settings = Settings::from_yaml(
            r#"
sensors:
  type: container
  children:
    reading: { type: display }
"#,
        )
        .unwrap();
        let mut conf = Config::new();
        conf.set("sensors", "oops").unwrap();
        let err = validate_config(&mut conf, &settings, true).unwrap_err();
        assert_eq!(err.path, "sensors");
    }

    #[test]
    fn bounded_float_rejects_nan() {
        let mut conf = Config::new();
        conf.set("controllers.legion_go.deadzone", f64::NAN).unwrap();
        let err = validate_config(&mut conf, &controllers(), false).unwrap_err();
        assert_eq!(err.path, "controllers.legion_go.deadzone");
        assert!(err.reason.contains("finite"), "reason: {}", err.reason);

        let unbounded = Settings::from_yaml("ratio: { type: float }").unwrap();
        let mut conf = Config::new();
        conf.set("ratio", f64::INFINITY).unwrap();
        validate_config(&mut conf, &unbounded, false).unwrap();
    }

    #[test]
    fn merge_combines_containers_from_separate_fragments() {
        let extra = Settings::from_yaml(
            r#"
controllers:
  type: container
  children:
    rog_ally:
      type: container
      children:
        enabled: { type: bool, default: false }
"#,
        )
        .unwrap();
        let hhd = Settings::section(
            "hhd",
            Setting::container(Section::from([(
                "debug".to_string(),
                Setting::new(SettingKind::Bool {
                    default: Some(false),
                }),
            )])),
        );

        let merged = Settings::merge([controllers(), extra, hhd]);
        let paths: Vec<_> = merged.leaves().into_iter().map(|l| l.path).collect();
        assert!(paths.contains(&"controllers.legion_go.gyro_scaling".to_string()));
        assert!(paths.contains(&"controllers.rog_ally.enabled".to_string()));
        assert!(paths.contains(&"hhd.debug".to_string()));
    }

    #[test]
    fn later_fragment_wins_on_leaf_collision() {
        let a = Settings::from_yaml("x: { type: int, default: 1 }").unwrap();
        let b = Settings::from_yaml("x: { type: bool, default: true }").unwrap();
        let merged = Settings::merge([a, b]);
        assert!(merged.defaults().to::<bool>("x").unwrap());
    }

    #[test]
    fn project_drops_undeclared_paths() {
        let settings = controllers();
        let mut conf = settings.defaults();
        conf.set("controllers.legion_go.stale_option", 7).unwrap();
        conf.set("unrelated.value", true).unwrap();

        let projected = settings.project(&conf);
        assert!(!projected.contains("controllers.legion_go.stale_option"));
        assert!(!projected.contains("unrelated"));
        assert_eq!(
            projected.get("controllers.legion_go.gyro_scaling"),
            conf.get("controllers.legion_go.gyro_scaling")
        );
    }

    #[test]
    fn empty_document_is_empty_settings() {
        assert!(Settings::from_yaml("").unwrap().is_empty());
    }
}
