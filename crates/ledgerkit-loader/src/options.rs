//! Session options and their effect on the pool, journal and date context.

use std::path::PathBuf;
use std::rc::Rc;

use ledgerkit_core::commodity::CommodityDefaults;
use ledgerkit_core::{CheckingStyle, CommodityPool, DateContext, Journal, JournalOptions};
use serde::Serialize;

/// Whether an option takes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionArg {
    Flag,
    Value,
}

/// Known option names and their arity.
const KNOWN_OPTIONS: &[(&str, OptionArg)] = &[
    ("decimal-comma", OptionArg::Flag),
    ("time-colon", OptionArg::Flag),
    ("permissive", OptionArg::Flag),
    ("pedantic", OptionArg::Flag),
    ("strict", OptionArg::Flag),
    ("check-payees", OptionArg::Flag),
    ("no-aliases", OptionArg::Flag),
    ("recursive-aliases", OptionArg::Flag),
    ("day-break", OptionArg::Flag),
    ("explicit", OptionArg::Flag),
    ("input-date-format", OptionArg::Value),
    ("master-account", OptionArg::Value),
    ("price-db", OptionArg::Value),
    ("file", OptionArg::Value),
];

/// Option validation warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionWarning {
    /// Warning code (E7001, E7002).
    pub code: &'static str,
    /// Warning message.
    pub message: String,
    /// Option name.
    pub option: String,
    /// Option value, if one was given.
    pub value: Option<String>,
}

/// Session options.
///
/// These are set from the command line or from `--name[=value]` lines in a
/// journal. Names use dashes; underscores are accepted and folded.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// `,` is the decimal mark for every commodity.
    pub decimal_comma: bool,
    /// `h`/`m` amounts print as `H:MM`.
    pub time_colon: bool,
    /// Balance assertions are not enforced.
    pub permissive: bool,
    /// Undeclared accounts, commodities and payees are errors.
    pub pedantic: bool,
    /// Undeclared accounts, commodities and payees are warnings.
    pub strict: bool,
    /// Payees are checked as well.
    pub check_payees: bool,
    /// Account aliases are ignored.
    pub no_aliases: bool,
    /// Aliases of aliases are expanded.
    pub recursive_aliases: bool,
    /// Timelog entries are split at midnight.
    pub day_break: bool,
    /// Names must be declared before use.
    pub explicit: bool,
    /// A strftime format tried before the built-in date forms.
    pub input_date_format: Option<String>,
    /// Account every journal is read under.
    pub master_account: Option<String>,
    /// Price database read before the journal.
    pub price_db: Option<PathBuf>,
    /// Journals to read when none are named.
    pub files: Vec<PathBuf>,
    /// Validation warnings collected while setting options.
    pub warnings: Vec<OptionWarning>,
}

/// The shared state options act on.
#[derive(Debug, Clone)]
pub struct OptionTargets {
    defaults: Rc<CommodityDefaults>,
    journal: Rc<JournalOptions>,
    dates: Rc<DateContext>,
}

impl OptionTargets {
    /// The targets belonging to `pool` and `journal`.
    #[must_use]
    pub fn of(pool: &CommodityPool, journal: &Journal) -> Self {
        Self {
            defaults: Rc::clone(pool.defaults()),
            journal: Rc::clone(journal.options()),
            dates: Rc::clone(pool.date_context()),
        }
    }
}

/// Whether `name` is a known option.
#[must_use]
pub fn is_known(name: &str) -> bool {
    KNOWN_OPTIONS.iter().any(|(known, _)| *known == name)
}

/// Every known option name.
pub fn known_names() -> impl Iterator<Item = &'static str> {
    KNOWN_OPTIONS.iter().map(|(name, _)| *name)
}

impl Options {
    /// Create new options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by name.
    ///
    /// Validates the option and collects any warnings in `self.warnings`;
    /// a rejected option leaves the settings unchanged.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        let key = key.trim_start_matches('-').replace('_', "-");
        let value = value.map(str::trim).filter(|v| !v.is_empty());

        let Some(&(_, arg)) = KNOWN_OPTIONS.iter().find(|(name, _)| *name == key) else {
            self.warn("E7001", format!("Unknown option \"{key}\""), &key, value);
            return;
        };

        match (arg, value) {
            (OptionArg::Flag, Some(v)) => {
                self.warn(
                    "E7002",
                    format!("Option \"{key}\" takes no value, got \"{v}\""),
                    &key,
                    value,
                );
                return;
            }
            (OptionArg::Value, None) => {
                self.warn("E7002", format!("Option \"{key}\" requires a value"), &key, None);
                return;
            }
            _ => {}
        }

        tracing::debug!(option = %key, ?value, "setting option");
        let text = value.unwrap_or_default().to_string();
        match key.as_str() {
            "decimal-comma" => self.decimal_comma = true,
            "time-colon" => self.time_colon = true,
            "permissive" => self.permissive = true,
            "pedantic" => self.pedantic = true,
            "strict" => self.strict = true,
            "check-payees" => self.check_payees = true,
            "no-aliases" => self.no_aliases = true,
            "recursive-aliases" => self.recursive_aliases = true,
            "day-break" => self.day_break = true,
            "explicit" => self.explicit = true,
            "input-date-format" => self.input_date_format = Some(text),
            "master-account" => self.master_account = Some(text),
            "price-db" => self.price_db = Some(PathBuf::from(text)),
            "file" => self.files.push(PathBuf::from(text)),
            _ => {}
        }
    }

    fn warn(&mut self, code: &'static str, message: String, option: &str, value: Option<&str>) {
        tracing::warn!(code, %message, "option rejected");
        self.warnings.push(OptionWarning {
            code,
            message,
            option: option.to_string(),
            value: value.map(str::to_string),
        });
    }

    /// The checking style these options select.
    ///
    /// `permissive` wins, then `pedantic`; `strict` and `explicit` both
    /// warn about undeclared names.
    #[must_use]
    pub const fn checking_style(&self) -> CheckingStyle {
        if self.permissive {
            CheckingStyle::Permissive
        } else if self.pedantic {
            CheckingStyle::Error
        } else if self.strict || self.explicit {
            CheckingStyle::Warning
        } else {
            CheckingStyle::Normal
        }
    }

    /// Push the current settings into `targets`.
    pub fn apply_to(&self, targets: &OptionTargets) {
        targets.defaults.set_decimal_comma(self.decimal_comma);
        targets.defaults.set_time_colon(self.time_colon);
        targets.journal.set_checking_style(self.checking_style());
        targets.journal.set_check_payees(self.check_payees);
        targets.journal.set_no_aliases(self.no_aliases);
        targets.journal.set_recursive_aliases(self.recursive_aliases);
        targets.journal.set_day_break(self.day_break);
        targets.dates.set_input_format(self.input_date_format.clone());
    }

    /// Drain the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<OptionWarning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::new();
        assert!(!opts.decimal_comma);
        assert_eq!(opts.checking_style(), CheckingStyle::Normal);
        assert!(opts.price_db.is_none());
    }

    #[test]
    fn test_set_options() {
        let mut opts = Options::new();
        opts.set("decimal-comma", None);
        opts.set("input_date_format", Some("%d.%m.%Y"));
        opts.set("--master-account", Some("Personal"));
        opts.set("file", Some("a.ledger"));
        opts.set("file", Some("b.ledger"));

        assert!(opts.warnings.is_empty(), "{:?}", opts.warnings);
        assert!(opts.decimal_comma);
        assert_eq!(opts.input_date_format.as_deref(), Some("%d.%m.%Y"));
        assert_eq!(opts.master_account.as_deref(), Some("Personal"));
        assert_eq!(opts.files, vec![PathBuf::from("a.ledger"), PathBuf::from("b.ledger")]);
    }

    #[test]
    fn test_unknown_option_warning() {
        let mut opts = Options::new();
        opts.set("no-such-option", Some("value"));

        assert_eq!(opts.warnings.len(), 1);
        assert_eq!(opts.warnings[0].code, "E7001");
        assert!(opts.warnings[0].message.contains("Unknown option"));
    }

    #[test]
    fn test_flag_with_value_is_rejected() {
        let mut opts = Options::new();
        opts.set("strict", Some("yes"));

        assert!(!opts.strict);
        assert_eq!(opts.warnings.len(), 1);
        assert_eq!(opts.warnings[0].code, "E7002");
        assert_eq!(opts.warnings[0].value.as_deref(), Some("yes"));
    }

    #[test]
    fn test_value_option_without_value() {
        let mut opts = Options::new();
        opts.set("price-db", Some("  "));

        assert!(opts.price_db.is_none());
        assert_eq!(opts.warnings[0].code, "E7002");
        assert!(opts.warnings[0].message.contains("requires a value"));
    }

    #[test]
    fn test_checking_style_precedence() {
        let style = |names: &[&str]| {
            let mut opts = Options::new();
            for name in names {
                opts.set(name, None);
            }
            opts.checking_style()
        };
        assert_eq!(style(&["strict"]), CheckingStyle::Warning);
        assert_eq!(style(&["explicit"]), CheckingStyle::Warning);
        assert_eq!(style(&["strict", "pedantic"]), CheckingStyle::Error);
        assert_eq!(style(&["pedantic", "permissive"]), CheckingStyle::Permissive);
    }

    #[test]
    fn test_apply_to_targets() {
        let pool = CommodityPool::with_builtins();
        let journal = Journal::new();
        let mut opts = Options::new();
        opts.set("decimal-comma", None);
        opts.set("pedantic", None);
        opts.set("day-break", None);
        opts.set("input-date-format", Some("%d.%m.%Y"));

        opts.apply_to(&OptionTargets::of(&pool, &journal));
        assert!(pool.defaults().decimal_comma());
        assert_eq!(journal.options().checking_style(), CheckingStyle::Error);
        assert!(journal.options().day_break());
        assert_eq!(pool.date_context().input_format().as_deref(), Some("%d.%m.%Y"));
    }

    #[test]
    fn test_known_names() {
        assert!(is_known("time-colon"));
        assert!(!is_known("time_colon"));
        assert_eq!(known_names().count(), KNOWN_OPTIONS.len());
    }
}
