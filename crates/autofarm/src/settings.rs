/*
[INPUT]:  JSON config file (persisted keys), user edits
[OUTPUT]: Validated TaskSettings snapshots, persisted settings file
[POS]:    Configuration layer - task settings schema and config store
[UPDATE]: When adding a task setting (add one SETTINGS_SCHEMA row and one struct field)
*/

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Farm target used when the party runs out of revival resources.
pub const FALLBACK_TARGET: &str = "7000G";
pub const FALLBACK_TARGET_TEXT: &str = "Money run (7000G)";

const CONFIG_FILE_NAME: &str = "config.json";

/// Everything a worker run needs, as the user configured it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    pub emulator_path: String,
    pub adb_port: i64,
    pub farm_target: String,
    pub farm_target_text: String,
    pub random_chest: bool,
    pub who_will_open: String,
    pub system_auto_combat: bool,
    pub aoe_once: bool,
    pub auto_after_aoe: bool,
    pub skip_combat_recover: bool,
    pub skip_chest_recover: bool,
    pub active_rest: bool,
    pub rest_interval: i64,
    pub karma_adjust: String,
    pub active_royalsuite_rest: bool,
    pub active_triumph: bool,
    pub spell_skills: Vec<String>,
    pub runner_command: String,
    pub runner_args: Vec<String>,
    pub max_runs: i64,
    pub dungeon_counter: i64,
    pub last_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Text,
    TextList,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Bool => "a boolean",
            FieldKind::Int => "an integer",
            FieldKind::Text => "a string",
            FieldKind::TextList => "a list of strings",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Bool(bool),
    Int(i64),
    Text(&'static str),
    TextList(&'static [&'static str]),
}

impl FieldDefault {
    fn value(self) -> SettingValue {
        match self {
            FieldDefault::Bool(value) => SettingValue::Bool(value),
            FieldDefault::Int(value) => SettingValue::Int(value),
            FieldDefault::Text(value) => SettingValue::Text(value.to_string()),
            FieldDefault::TextList(values) => {
                SettingValue::TextList(values.iter().map(|value| value.to_string()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
    TextList(Vec<String>),
}

impl SettingValue {
    /// Decodes a persisted JSON value, or `None` when it does not fit `kind`.
    fn from_json(kind: FieldKind, value: &Value) -> Option<Self> {
        match (kind, value) {
            (FieldKind::Bool, Value::Bool(flag)) => Some(SettingValue::Bool(*flag)),
            (FieldKind::Int, Value::Number(number)) => number.as_i64().map(SettingValue::Int),
            // numeric entry fields were historically saved as strings
            (FieldKind::Int, Value::String(text)) => {
                text.trim().parse().ok().map(SettingValue::Int)
            }
            (FieldKind::Text, Value::String(text)) => Some(SettingValue::Text(text.clone())),
            (FieldKind::Text, Value::Null) => Some(SettingValue::Text(String::new())),
            (FieldKind::TextList, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(SettingValue::TextList),
            _ => None,
        }
    }

    fn into_json(self) -> Value {
        match self {
            SettingValue::Bool(flag) => Value::Bool(flag),
            SettingValue::Int(number) => Value::from(number),
            SettingValue::Text(text) => Value::String(text),
            SettingValue::TextList(items) => {
                Value::Array(items.into_iter().map(Value::String).collect())
            }
        }
    }
}

/// One row of the settings schema.
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: FieldDefault,
    pub persisted_key: &'static str,
    pub get: fn(&TaskSettings) -> SettingValue,
    /// Only called with a value already checked against `kind`.
    pub set: fn(&mut TaskSettings, SettingValue),
}

macro_rules! bool_field {
    ($field:ident, $default:expr, $key:literal) => {
        FieldSpec {
            name: stringify!($field),
            kind: FieldKind::Bool,
            default: FieldDefault::Bool($default),
            persisted_key: $key,
            get: |settings| SettingValue::Bool(settings.$field),
            set: |settings, value| {
                if let SettingValue::Bool(flag) = value {
                    settings.$field = flag;
                }
            },
        }
    };
}

macro_rules! int_field {
    ($field:ident, $default:expr, $key:literal) => {
        FieldSpec {
            name: stringify!($field),
            kind: FieldKind::Int,
            default: FieldDefault::Int($default),
            persisted_key: $key,
            get: |settings| SettingValue::Int(settings.$field),
            set: |settings, value| {
                if let SettingValue::Int(number) = value {
                    settings.$field = number;
                }
            },
        }
    };
}

macro_rules! text_field {
    ($field:ident, $default:expr, $key:literal) => {
        FieldSpec {
            name: stringify!($field),
            kind: FieldKind::Text,
            default: FieldDefault::Text($default),
            persisted_key: $key,
            get: |settings| SettingValue::Text(settings.$field.clone()),
            set: |settings, value| {
                if let SettingValue::Text(text) = value {
                    settings.$field = text;
                }
            },
        }
    };
}

macro_rules! list_field {
    ($field:ident, $default:expr, $key:literal) => {
        FieldSpec {
            name: stringify!($field),
            kind: FieldKind::TextList,
            default: FieldDefault::TextList($default),
            persisted_key: $key,
            get: |settings| SettingValue::TextList(settings.$field.clone()),
            set: |settings, value| {
                if let SettingValue::TextList(items) = value {
                    settings.$field = items;
                }
            },
        }
    };
}

/// The complete, fixed list of persisted task settings.
pub static SETTINGS_SCHEMA: &[FieldSpec] = &[
    text_field!(emulator_path, "", "_EMUPATH"),
    int_field!(adb_port, 5555, "_ADBPORT"),
    text_field!(farm_target, "", "_FARMTARGET"),
    text_field!(farm_target_text, "", "_FARMTARGET_TEXT"),
    bool_field!(random_chest, true, "_RANDOMLYOPENCHEST"),
    text_field!(who_will_open, "Random", "_WHOWILLOPENIT"),
    bool_field!(system_auto_combat, false, "_SYSTEMAUTOCOMBAT"),
    bool_field!(aoe_once, false, "_AOE_ONCE"),
    bool_field!(auto_after_aoe, false, "_AUTO_AFTER_AOE"),
    bool_field!(skip_combat_recover, false, "_SKIPCOMBATRECOVER"),
    bool_field!(skip_chest_recover, false, "_SKIPCHESTRECOVER"),
    bool_field!(active_rest, true, "_ACTIVE_REST"),
    int_field!(rest_interval, 0, "_RESTINTERVEL"),
    text_field!(karma_adjust, "+0", "_KARMAADJUST"),
    bool_field!(active_royalsuite_rest, false, "_ACTIVE_ROYALSUITE_REST"),
    bool_field!(active_triumph, false, "_ACTIVE_TRIUMPH"),
    list_field!(spell_skills, &[], "_SPELLSKILLCONFIG"),
    text_field!(runner_command, "", "_RUNNERCOMMAND"),
    list_field!(runner_args, &[], "_RUNNERARGS"),
    int_field!(max_runs, 0, "_MAXRUNS"),
    int_field!(dungeon_counter, 0, "_COUNTERDUNG"),
    text_field!(last_version, "", "LAST_VERSION"),
];

impl TaskSettings {
    fn blank() -> Self {
        Self {
            emulator_path: String::new(),
            adb_port: 0,
            farm_target: String::new(),
            farm_target_text: String::new(),
            random_chest: false,
            who_will_open: String::new(),
            system_auto_combat: false,
            aoe_once: false,
            auto_after_aoe: false,
            skip_combat_recover: false,
            skip_chest_recover: false,
            active_rest: false,
            rest_interval: 0,
            karma_adjust: String::new(),
            active_royalsuite_rest: false,
            active_triumph: false,
            spell_skills: Vec::new(),
            runner_command: String::new(),
            runner_args: Vec::new(),
            max_runs: 0,
            dungeon_counter: 0,
            last_version: String::new(),
        }
    }

    /// Decodes settings from a persisted JSON object; absent keys take their default.
    pub fn from_object(object: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut settings = Self::blank();
        for field in SETTINGS_SCHEMA {
            let value = match object.get(field.persisted_key) {
                Some(raw) => SettingValue::from_json(field.kind, raw).ok_or(
                    ConfigError::InvalidField {
                        key: field.persisted_key,
                        expected: field.kind.expected(),
                    },
                )?,
                None => field.default.value(),
            };
            (field.set)(&mut settings, value);
        }
        Ok(settings)
    }

    /// Writes every schema field into `object`, leaving other keys untouched.
    pub fn write_into(&self, object: &mut Map<String, Value>) {
        for field in SETTINGS_SCHEMA {
            object.insert(field.persisted_key.to_string(), (field.get)(self).into_json());
        }
    }

    /// Checks the fields a worker depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "runner_command",
                message: "runner command is not set".to_string(),
            });
        }
        if self.farm_target.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "farm_target",
                message: "no farm target selected".to_string(),
            });
        }
        if !(1..=65_535).contains(&self.adb_port) {
            return Err(ConfigError::Invalid {
                field: "adb_port",
                message: format!("{} is not a valid port", self.adb_port),
            });
        }
        if self.rest_interval < 0 {
            return Err(ConfigError::Invalid {
                field: "rest_interval",
                message: "must not be negative".to_string(),
            });
        }
        if self.max_runs < 0 {
            return Err(ConfigError::Invalid {
                field: "max_runs",
                message: "must not be negative".to_string(),
            });
        }
        if !is_karma_adjust(&self.karma_adjust) {
            return Err(ConfigError::Invalid {
                field: "karma_adjust",
                message: format!("{:?} must look like +N or -N", self.karma_adjust),
            });
        }
        Ok(())
    }

    pub fn is_fallback_target(&self) -> bool {
        self.farm_target == FALLBACK_TARGET
    }

    /// Snapshot for the run that replaces this one once revival resources are gone.
    pub fn for_fallback_target(&self) -> Self {
        Self {
            farm_target: FALLBACK_TARGET.to_string(),
            farm_target_text: FALLBACK_TARGET_TEXT.to_string(),
            dungeon_counter: 0,
            ..self.clone()
        }
    }

    /// Label shown for the current target
    pub fn target_label(&self) -> &str {
        if self.farm_target_text.is_empty() {
            &self.farm_target
        } else {
            &self.farm_target_text
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        let mut settings = Self::blank();
        for field in SETTINGS_SCHEMA {
            (field.set)(&mut settings, field.default.value());
        }
        settings
    }
}

fn is_karma_adjust(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some('+' | '-'))
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

/// JSON-file backed settings store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/autofarm/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("autofarm").join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads settings; a missing file yields defaults.
    pub fn load(&self) -> Result<TaskSettings, ConfigError> {
        let object = self.read_object()?;
        let settings = TaskSettings::from_object(&object)?;
        tracing::debug!(path = %self.path.display(), "task settings loaded");
        Ok(settings)
    }

    pub fn save(&self, settings: &TaskSettings) -> Result<(), ConfigError> {
        let mut object = self.read_object()?;
        settings.write_into(&mut object);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(&Value::Object(object)).map_err(|source| {
            ConfigError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, content).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "task settings saved");
        Ok(())
    }

    fn read_object(&self) -> Result<Map<String, Value>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content).map_err(|source| ConfigError::Malformed {
            path: self.path.clone(),
            source,
        })
    }
}
