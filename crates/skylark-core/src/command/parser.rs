//! Operator command grammar.
//!
//! `<prefix><name> [action] [args...]`. Names and actions are
//! case-insensitive and surrounding whitespace is ignored. Anything the
//! grammar does not recognize parses to [`Command::Help`] or
//! [`Command::Usage`]; parsing never fails.

use crate::agent::Switch;
use crate::policy::lists::ListKind;

/// Sub-command for the set-like commands (`timeline`, `antenna`, lists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetAction {
    Status,
    /// Remote inventory (antennas) or the entries themselves (lists).
    List,
    Add(Vec<String>),
    Del(Vec<String>),
    Set(Vec<String>),
    Clear,
    Reset,
}

/// Which in-memory cache a `cache clear` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Chat,
    Locks,
    Events,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    SysInfo,
    Plugins,
    /// `None` shows the current model.
    Model(Option<String>),
    ModelReset,
    Enable(String),
    Disable(String),
    Reload(String),
    Timeline(SetAction),
    Antenna(SetAction),
    CacheStatus,
    CacheClear(CacheScope),
    DbStats,
    DbClear { plugin: String, key: Option<String> },
    List(ListKind, SetAction),
    Toggle(Switch, bool),
    /// Known command, bad arguments: answer with its usage line.
    Usage(&'static str),
}

/// Parse `text` if it starts with `prefix`; `None` means it is not a command.
pub fn parse(text: &str, prefix: &str) -> Option<Command> {
    let body = text.trim().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let Some(name) = words.next() else {
        return Some(Command::Help);
    };
    let name = name.to_lowercase();
    let args: Vec<String> = words.map(str::to_string).collect();

    Some(match name.as_str() {
        "help" | "h" | "?" => Command::Help,
        "status" => Command::Status,
        "sysinfo" => Command::SysInfo,
        "plugins" | "plugin" => Command::Plugins,
        "model" => match args.first().map(|a| a.to_lowercase()).as_deref() {
            None => Command::Model(None),
            Some("reset") => Command::ModelReset,
            Some(_) => Command::Model(Some(args[0].clone())),
        },
        "enable" => plugin_arg(args, Command::Enable, "enable <plugin>"),
        "disable" => plugin_arg(args, Command::Disable, "disable <plugin>"),
        "reload" => plugin_arg(args, Command::Reload, "reload <plugin>"),
        "timeline" | "tl" => match set_action(&args, false) {
            Some(action) => Command::Timeline(action),
            None => Command::Usage(TIMELINE_USAGE),
        },
        "antenna" => match set_action(&args, true) {
            Some(action) => Command::Antenna(action),
            None => Command::Usage(ANTENNA_USAGE),
        },
        "cache" | "memory" => cache(&args),
        "dbstats" => Command::DbStats,
        "dbclear" => match args.as_slice() {
            [plugin] => Command::DbClear {
                plugin: plugin.clone(),
                key: None,
            },
            [plugin, key] => Command::DbClear {
                plugin: plugin.clone(),
                key: Some(key.clone()),
            },
            _ => Command::Usage(DBCLEAR_USAGE),
        },
        "whitelist" => list(ListKind::Whitelist, &args, WHITELIST_USAGE),
        "blacklist" => list(ListKind::Blacklist, &args, BLACKLIST_USAGE),
        "chat" => toggle(Switch::Chat, &args, "chat on|off"),
        "mention" => toggle(Switch::Mention, &args, "mention on|off"),
        "autopost" => toggle(Switch::AutoPost, &args, "autopost on|off"),
        _ => Command::Help,
    })
}

const TIMELINE_USAGE: &str = "timeline [status|add|del|set|clear|reset] [home|local|hybrid|global ...]";
const ANTENNA_USAGE: &str = "antenna [status|list|add|del|set|clear|reset] [id|name ...]";
const CACHE_USAGE: &str = "cache [status|clear] [chat|locks|events|all]";
const DBCLEAR_USAGE: &str = "dbclear <plugin> [key]";
const WHITELIST_USAGE: &str = "whitelist [list|add|del|set|clear|reset] [user ...]";
const BLACKLIST_USAGE: &str = "blacklist [list|add|del|set|clear|reset] [user ...]";

fn plugin_arg(args: Vec<String>, make: fn(String) -> Command, usage: &'static str) -> Command {
    match <[String; 1]>::try_from(args) {
        Ok([name]) => make(name),
        Err(_) => Command::Usage(usage),
    }
}

/// `allow_list` accepts the `list` action (antennas).
fn set_action(args: &[String], allow_list: bool) -> Option<SetAction> {
    let (action, rest) = match args.split_first() {
        None => return Some(SetAction::Status),
        Some((action, rest)) => (action.to_lowercase(), rest.to_vec()),
    };
    let needs_args = |make: fn(Vec<String>) -> SetAction| {
        if rest.is_empty() {
            None
        } else {
            Some(make(rest.clone()))
        }
    };
    match action.as_str() {
        "status" | "show" if rest.is_empty() => Some(SetAction::Status),
        "list" | "ls" if allow_list && rest.is_empty() => Some(SetAction::List),
        "add" => needs_args(SetAction::Add),
        "del" | "delete" | "remove" | "rm" => needs_args(SetAction::Del),
        "set" => needs_args(SetAction::Set),
        "clear" if rest.is_empty() => Some(SetAction::Clear),
        "reset" if rest.is_empty() => Some(SetAction::Reset),
        _ => None,
    }
}

fn cache(args: &[String]) -> Command {
    let lowered: Vec<String> = args.iter().map(|a| a.to_lowercase()).collect();
    let words: Vec<&str> = lowered.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] | ["status"] => Command::CacheStatus,
        ["clear"] | ["clear", "all"] => Command::CacheClear(CacheScope::All),
        ["clear", "chat"] => Command::CacheClear(CacheScope::Chat),
        ["clear", "locks"] => Command::CacheClear(CacheScope::Locks),
        ["clear", "events"] => Command::CacheClear(CacheScope::Events),
        _ => Command::Usage(CACHE_USAGE),
    }
}

fn list(kind: ListKind, args: &[String], usage: &'static str) -> Command {
    if args.first().is_some_and(|a| a.eq_ignore_ascii_case("list")) && args.len() == 1 {
        return Command::List(kind, SetAction::List);
    }
    match set_action(args, false) {
        Some(SetAction::Status) => Command::List(kind, SetAction::List),
        Some(action) => Command::List(kind, action),
        None => Command::Usage(usage),
    }
}

fn toggle(switch: Switch, args: &[String], usage: &'static str) -> Command {
    match args.first().map(|a| a.to_lowercase()).as_deref() {
        Some("on") | Some("enable") if args.len() == 1 => Command::Toggle(switch, true),
        Some("off") | Some("disable") if args.len() == 1 => Command::Toggle(switch, false),
        _ => Command::Usage(usage),
    }
}

/// Help text with `prefix` in front of every command.
pub fn help(prefix: &str) -> String {
    let lines = [
        "help - this text",
        "status - connection, toggles and counters",
        "sysinfo - process information",
        "plugins - plugin states",
        "model [name|reset] - show or switch the model",
        "enable|disable|reload <plugin>",
        TIMELINE_USAGE,
        ANTENNA_USAGE,
        CACHE_USAGE,
        "dbstats - table row counts",
        DBCLEAR_USAGE,
        WHITELIST_USAGE,
        BLACKLIST_USAGE,
        "chat|mention|autopost on|off",
    ];
    let mut out = String::from("Commands:");
    for line in lines {
        out.push('\n');
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Command {
        parse(text, "^").unwrap()
    }

    #[test]
    fn non_prefixed_text_is_not_a_command() {
        assert!(parse("hello", "^").is_none());
        assert!(parse("  ^status", "^").is_some());
    }

    #[test]
    fn names_are_case_insensitive_with_aliases() {
        assert_eq!(p("^STATUS"), Command::Status);
        assert_eq!(p("^h"), Command::Help);
        assert_eq!(p("^?"), Command::Help);
        assert_eq!(p("^memory clear chat"), Command::CacheClear(CacheScope::Chat));
        assert_eq!(p("^"), Command::Help);
        assert_eq!(p("^frobnicate"), Command::Help);
    }

    #[test]
    fn model_arguments() {
        assert_eq!(p("^model"), Command::Model(None));
        assert_eq!(p("^model Reset"), Command::ModelReset);
        assert_eq!(p("^model gpt-4o"), Command::Model(Some("gpt-4o".into())));
    }

    #[test]
    fn set_actions_parse_arguments() {
        assert_eq!(p("^timeline"), Command::Timeline(SetAction::Status));
        assert_eq!(
            p("^timeline ADD home local"),
            Command::Timeline(SetAction::Add(vec!["home".into(), "local".into()]))
        );
        assert_eq!(p("^antenna list"), Command::Antenna(SetAction::List));
        assert_eq!(p("^antenna clear"), Command::Antenna(SetAction::Clear));
        assert_eq!(p("^timeline add"), Command::Usage(TIMELINE_USAGE));
        assert_eq!(p("^timeline list"), Command::Usage(TIMELINE_USAGE));
    }

    #[test]
    fn lists_and_toggles() {
        assert_eq!(p("^whitelist"), Command::List(ListKind::Whitelist, SetAction::List));
        assert_eq!(
            p("^blacklist add @spam@bad.example"),
            Command::List(ListKind::Blacklist, SetAction::Add(vec!["@spam@bad.example".into()]))
        );
        assert_eq!(p("^autopost OFF"), Command::Toggle(Switch::AutoPost, false));
        assert_eq!(p("^chat maybe"), Command::Usage("chat on|off"));
    }

    #[test]
    fn plugin_and_db_commands() {
        assert_eq!(p("^reload topics"), Command::Reload("topics".into()));
        assert_eq!(p("^enable"), Command::Usage("enable <plugin>"));
        assert_eq!(
            p("^dbclear radar seen"),
            Command::DbClear {
                plugin: "radar".into(),
                key: Some("seen".into())
            }
        );
        assert_eq!(p("^dbclear"), Command::Usage(DBCLEAR_USAGE));
    }

    #[test]
    fn help_lists_prefixed_commands() {
        let text = help("!");
        assert!(text.contains("!status"));
        assert!(text.contains("!dbclear <plugin> [key]"));
    }
}
