//! Admin commands, typed in chat as `/name args`.
//!
//! Each command validates its arguments and either changes the room or
//! returns a usage line. The reply is whispered to the admin.

use std::str::FromStr;

use raceway_protocol::{AllowedTiers, StageRotationMode, TierRotationMode};

use crate::Room;

type Handler = fn(&mut Room, &str) -> String;

struct Command {
    name: &'static str,
    help: &'static str,
    handler: Handler,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        help: "Lists commands, or describes one: help [command]",
        handler: help,
    },
    Command {
        name: "say",
        help: "Sends a chat message from the server: say [message]",
        handler: say,
    },
    Command {
        name: "clients",
        help: "Lists connected clients",
        handler: clients,
    },
    Command {
        name: "players",
        help: "Lists players and their characters",
        handler: players,
    },
    Command {
        name: "kick",
        help: "Kicks the client whose name contains the search: kick [name]",
        handler: kick,
    },
    Command {
        name: "returnToLobby",
        help: "Ends the race and returns everyone to the lobby",
        handler: return_to_lobby,
    },
    Command {
        name: "forceStart",
        help: "Starts the race immediately",
        handler: force_start,
    },
    Command {
        name: "setStage",
        help: "Sets the stage for the next race",
        handler: set_stage,
    },
    Command {
        name: "setLaps",
        help: "Sets the lap count",
        handler: set_laps,
    },
    Command {
        name: "setAutoStartTime",
        help: "Sets the auto start countdown in seconds",
        handler: set_auto_start_time,
    },
    Command {
        name: "setAutoStartMinPlayers",
        help: "Sets how many players start the auto start countdown",
        handler: set_auto_start_min_players,
    },
    Command {
        name: "setStageRotationMode",
        help: "Sets how the stage changes after each race",
        handler: set_stage_rotation_mode,
    },
    Command {
        name: "setAllowedTiers",
        help: "Sets which character tiers may race",
        handler: set_allowed_tiers,
    },
    Command {
        name: "setTierRotationMode",
        help: "Sets how the allowed tiers change after each race",
        handler: set_tier_rotation_mode,
    },
    Command {
        name: "setVoteRatio",
        help: "Sets the fraction of clients needed to vote back to the lobby",
        handler: set_vote_ratio,
    },
    Command {
        name: "setDisqualificationTime",
        help: "Sets the idle time before a racer is disqualified, 0 to disable",
        handler: set_disqualification_time,
    },
    Command {
        name: "toggleDebug",
        help: "Logs every message sent and received",
        handler: toggle_debug,
    },
];

/// Runs one command line (without the leading `/`) and returns the reply.
pub(crate) fn execute(room: &mut Room, line: &str) -> String {
    let line = line.trim();
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    };
    match COMMANDS.iter().find(|c| c.name == name) {
        Some(command) => (command.handler)(room, args),
        None => format!("Command '{name}' not found."),
    }
}

fn help(_: &mut Room, args: &str) -> String {
    if args.is_empty() {
        let names: Vec<&str> = COMMANDS.iter().map(|c| c.name).collect();
        return format!(
            "Available commands: {}\nType 'help [command]' for details.",
            names.join(", ")
        );
    }
    match COMMANDS.iter().find(|c| c.name == args) {
        Some(command) => format!("{}: {}", command.name, command.help),
        None => format!("Command '{args}' not found."),
    }
}

fn say(room: &mut Room, args: &str) -> String {
    if args.is_empty() {
        return "Usage: say [message]".to_string();
    }
    room.announce(args.to_string());
    "Chat message sent".to_string()
}

fn clients(room: &mut Room, _: &str) -> String {
    let mut out = format!("{} connected client(s)", room.clients().len());
    for client in room.clients() {
        out.push_str(&format!("\n{}", client.name));
        if client.is_admin {
            out.push_str(" (admin)");
        }
        if let Some(ping) = room.ping(client.conn) {
            out.push_str(&format!(" {}ms", ping.as_millis()));
        }
    }
    out
}

fn players(room: &mut Room, _: &str) -> String {
    let mut out = format!("{} player(s)", room.players().len());
    for player in room.players() {
        let owner = room
            .clients()
            .iter()
            .find(|c| c.id == player.client_id)
            .map_or("?", |c| c.name.as_str());
        out.push_str(&format!(
            "\n{owner} [{}] character {}{}",
            player.ctrl,
            player.character,
            if player.ready { " ready" } else { "" }
        ));
    }
    out
}

fn kick(room: &mut Room, args: &str) -> String {
    if args.is_empty() {
        return "Usage: kick [client name]".to_string();
    }
    let needle = args.to_lowercase();
    let matches: Vec<_> = room
        .clients()
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&needle))
        .map(|c| (c.conn, c.name.clone()))
        .collect();
    match matches.as_slice() {
        [] => "No clients match your search.".to_string(),
        [(conn, name)] => {
            room.disconnect_connection(*conn, "Kicked by server");
            format!("Kicked {name}")
        }
        many => {
            let names: Vec<&str> = many.iter().map(|(_, n)| n.as_str()).collect();
            format!(
                "More than one client matches your search, be more specific: {}",
                names.join(", ")
            )
        }
    }
}

fn return_to_lobby(room: &mut Room, _: &str) -> String {
    if room.return_to_lobby() {
        "Returned to the lobby.".to_string()
    } else {
        "Already in the lobby.".to_string()
    }
}

fn force_start(room: &mut Room, _: &str) -> String {
    if room.state().is_racing() {
        return "Race can only be force started in the lobby.".to_string();
    }
    room.load_race();
    "The race has been forcefully started.".to_string()
}

fn set_stage(room: &mut Room, args: &str) -> String {
    let max = room.config().stage_count.saturating_sub(1);
    match args.parse::<u32>() {
        Ok(stage) if stage <= max => {
            room.update_settings(|s| s.stage_id = stage);
            format!("Stage set to {stage}")
        }
        _ => format!("Usage: setStage [0-{max}]"),
    }
}

/// Parses a strictly positive whole number.
fn positive(args: &str) -> Option<u32> {
    args.parse::<u32>().ok().filter(|n| *n > 0)
}

fn set_laps(room: &mut Room, args: &str) -> String {
    match positive(args) {
        Some(laps) => {
            room.update_settings(|s| s.laps = laps);
            format!("Lap count set to {laps}")
        }
        None => "Usage: setLaps [>0]".to_string(),
    }
}

fn set_auto_start_time(room: &mut Room, args: &str) -> String {
    match positive(args) {
        Some(seconds) => {
            room.update_settings(|s| s.auto_start_time = seconds);
            format!("Auto start time set to {seconds} seconds")
        }
        None => "Usage: setAutoStartTime [>0]".to_string(),
    }
}

fn set_auto_start_min_players(room: &mut Room, args: &str) -> String {
    match positive(args) {
        Some(count) => {
            room.update_settings(|s| s.auto_start_min_players = count);
            room.refresh_auto_start();
            format!("Auto start minimum players set to {count}")
        }
        None => "Usage: setAutoStartMinPlayers [>0]".to_string(),
    }
}

/// Parses a named mode or returns its usage line.
fn mode<T: FromStr>(command: &str, names: &str, args: &str) -> Result<T, String> {
    args.parse::<T>()
        .map_err(|_| format!("Usage: {command} [{names}]"))
}

fn set_stage_rotation_mode(room: &mut Room, args: &str) -> String {
    match mode::<StageRotationMode>("setStageRotationMode", StageRotationMode::NAMES, args) {
        Ok(mode) => {
            room.update_settings(|s| s.stage_rotation_mode = mode);
            format!("Stage rotation mode set to {mode}")
        }
        Err(usage) => usage,
    }
}

fn set_allowed_tiers(room: &mut Room, args: &str) -> String {
    match mode::<AllowedTiers>("setAllowedTiers", AllowedTiers::NAMES, args) {
        Ok(tiers) => {
            room.update_settings(|s| s.allowed_tiers = tiers);
            room.correct_player_tiers();
            room.announce(tiers.description().to_string());
            format!("Allowed tiers set to {tiers}")
        }
        Err(usage) => usage,
    }
}

fn set_tier_rotation_mode(room: &mut Room, args: &str) -> String {
    match mode::<TierRotationMode>("setTierRotationMode", TierRotationMode::NAMES, args) {
        Ok(mode) => {
            room.update_settings(|s| s.tier_rotation_mode = mode);
            format!("Tier rotation mode set to {mode}")
        }
        Err(usage) => usage,
    }
}

fn set_vote_ratio(room: &mut Room, args: &str) -> String {
    match args.parse::<f64>() {
        Ok(ratio) if (0.0..=1.0).contains(&ratio) => {
            room.update_settings(|s| s.vote_ratio = ratio);
            room.check_lobby_votes();
            format!("Vote ratio set to {ratio}")
        }
        _ => "Usage: setVoteRatio [0.0-1.0]".to_string(),
    }
}

fn set_disqualification_time(room: &mut Room, args: &str) -> String {
    match args.parse::<u32>() {
        Ok(seconds) => {
            room.update_settings(|s| s.disqualification_time = seconds);
            if seconds == 0 {
                "Disqualification disabled".to_string()
            } else {
                format!("Disqualification time set to {seconds} seconds")
            }
        }
        Err(_) => "Usage: setDisqualificationTime [>=0]".to_string(),
    }
}

fn toggle_debug(room: &mut Room, _: &str) -> String {
    format!("Debug mode set to {}", room.toggle_debug())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoomConfig;
    use raceway_protocol::RoomId;

    fn room() -> Room {
        Room::new(RoomId(1), RoomConfig::default())
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(execute(&mut room(), "fly"), "Command 'fly' not found.");
    }

    #[test]
    fn test_usage_strings_on_bad_arguments() {
        let mut room = room();
        assert_eq!(execute(&mut room, "setStage 5"), "Usage: setStage [0-4]");
        assert_eq!(execute(&mut room, "setLaps 0"), "Usage: setLaps [>0]");
        assert_eq!(execute(&mut room, "setVoteRatio 1.5"), "Usage: setVoteRatio [0.0-1.0]");
        assert_eq!(
            execute(&mut room, "setStageRotationMode sideways"),
            "Usage: setStageRotationMode [None|Random|Sequenced]"
        );
        assert_eq!(
            execute(&mut room, "setDisqualificationTime -1"),
            "Usage: setDisqualificationTime [>=0]"
        );
        assert_eq!(execute(&mut room, "say"), "Usage: say [message]");
        assert_eq!(room.settings(), &raceway_protocol::MatchSettings::default());
    }

    #[test]
    fn test_setters_change_settings() {
        let mut room = room();
        assert_eq!(execute(&mut room, "setStage 3"), "Stage set to 3");
        assert_eq!(execute(&mut room, "setLaps 4"), "Lap count set to 4");
        assert_eq!(
            execute(&mut room, "setTierRotationMode weightedrandom"),
            "Tier rotation mode set to WeightedRandom"
        );
        assert_eq!(execute(&mut room, "setVoteRatio 0.5"), "Vote ratio set to 0.5");
        assert_eq!(
            execute(&mut room, "setAllowedTiers OddOnly"),
            "Allowed tiers set to OddOnly"
        );

        let s = room.settings();
        assert_eq!(s.stage_id, 3);
        assert_eq!(s.laps, 4);
        assert_eq!(s.tier_rotation_mode, TierRotationMode::WeightedRandom);
        assert_eq!(s.vote_ratio, 0.5);
        assert_eq!(s.allowed_tiers, AllowedTiers::OddOnly);
    }

    #[test]
    fn test_lobby_only_commands() {
        let mut room = room();
        assert_eq!(execute(&mut room, "returnToLobby"), "Already in the lobby.");
        assert_eq!(execute(&mut room, "kick bob"), "No clients match your search.");
        assert_eq!(execute(&mut room, "toggleDebug"), "Debug mode set to true");
        assert!(execute(&mut room, "help").starts_with("Available commands: help, say"));
        assert_eq!(
            execute(&mut room, "help kick"),
            "kick: Kicks the client whose name contains the search: kick [name]"
        );
    }
}
