use serde_json::Value;
use shared::protocol::DeviceCommand;

const TEST_STA_PROMPT: &str = "This will disconnect the device from the server and impact all \
connected clients. The device will attempt to rejoin its stored network on failure. Proceed?";
const STORE_STA_PROMPT: &str = "This will save the wifi credentials on the device; they are not \
remotely recoverable if incorrect, and take effect on reboot. Proceed?";
const SERVICE_PROMPT: &str = "This will return the device to its primary mode on the next reset, \
disabling the support interface. Proceed?";
const RESET_PROMPT: &str = "This will reset the device. Proceed?";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Quit,
    Device(DeviceCommand),
    UpgradeCheck,
    UpgradeCreate,
    UpgradePerform,
    UpgradeStop,
}

/// Parse one operator line. `Ok(None)` means a blank line. Validation
/// failures collect every problem so they can be surfaced line by line;
/// nothing is sent for a line that fails validation.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, Vec<String>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match head {
        "help" => ConsoleCommand::Help,
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        "get" => match rest.as_slice() {
            [item] => ConsoleCommand::Device(DeviceCommand::get(*item)),
            [] => return Err(vec!["get: item is required".into()]),
            _ => return Err(vec!["get: takes a single item".into()]),
        },
        "cmd" => match rest.split_first() {
            Some((item, params)) => ConsoleCommand::Device(DeviceCommand::cmd(
                *item,
                params.iter().map(|p| Value::from(*p)).collect(),
            )),
            None => return Err(vec!["cmd: item is required".into()]),
        },
        "gps" | "rb" => toggle(head, &rest)?,
        "lora" => match rest.split_first() {
            Some((&"send", text)) => {
                if text.is_empty() {
                    return Err(vec!["lora send: message text is required".into()]);
                }
                ConsoleCommand::Device(DeviceCommand::cmd(
                    "send_lora",
                    vec![Value::from(text.join(" "))],
                ))
            }
            _ => toggle(head, &rest)?,
        },
        "sta" => {
            let mut problems = Vec::new();
            let item = match rest.first() {
                Some(&"test") => Some("test_new_sta"),
                Some(&"store") => Some("store_new_sta"),
                _ => {
                    problems.push("sta: expected `test` or `store`".to_string());
                    None
                }
            };
            if rest.get(1).is_none() {
                problems.push("sta: ssid is required".to_string());
            }
            if rest.get(2).is_none() {
                problems.push("sta: passphrase is required".to_string());
            }
            if !problems.is_empty() {
                return Err(problems);
            }
            ConsoleCommand::Device(DeviceCommand::cmd(
                item.unwrap_or_default(),
                vec![Value::from(rest[1]), Value::from(rest[2])],
            ))
        }
        "app" => match rest.as_slice() {
            [name] => {
                ConsoleCommand::Device(DeviceCommand::cmd("switch_app", vec![Value::from(*name)]))
            }
            _ => return Err(vec!["app: application name is required".into()]),
        },
        "service" => ConsoleCommand::Device(DeviceCommand::cmd("service", Vec::new())),
        "reset" => ConsoleCommand::Device(DeviceCommand::cmd("reset", Vec::new())),
        "upgrade" => match rest.as_slice() {
            ["check"] => ConsoleCommand::UpgradeCheck,
            ["create"] => ConsoleCommand::UpgradeCreate,
            ["perform"] => ConsoleCommand::UpgradePerform,
            ["stop"] => ConsoleCommand::UpgradeStop,
            _ => return Err(vec!["upgrade: expected check, create, perform or stop".into()]),
        },
        unknown => return Err(vec![format!("unknown command: {unknown} (try `help`)")]),
    };
    Ok(Some(command))
}

fn toggle(subsystem: &str, rest: &[&str]) -> Result<ConsoleCommand, Vec<String>> {
    match rest {
        ["start"] => Ok(ConsoleCommand::Device(DeviceCommand::cmd(
            format!("start_{subsystem}"),
            Vec::new(),
        ))),
        ["stop"] => Ok(ConsoleCommand::Device(DeviceCommand::cmd(
            format!("stop_{subsystem}"),
            Vec::new(),
        ))),
        _ => Err(vec![format!("{subsystem}: expected start or stop")]),
    }
}

/// Commands that change device state irreversibly go through the
/// confirmation gate first.
pub fn confirmation_prompt(device: &DeviceCommand) -> Option<&'static str> {
    match device.item.as_str() {
        "test_new_sta" => Some(TEST_STA_PROMPT),
        "store_new_sta" => Some(STORE_STA_PROMPT),
        "service" => Some(SERVICE_PROMPT),
        "reset" => Some(RESET_PROMPT),
        _ => None,
    }
}

pub fn help_text() -> &'static str {
    "commands:\n\
     \x20 status                      show channel, readout and upgrade state\n\
     \x20 get <item>                  request a parameter group (e.g. get wifi)\n\
     \x20 cmd <item> [params...]      send a raw device command\n\
     \x20 gps|rb|lora start|stop      toggle a subsystem\n\
     \x20 lora send <text>            transmit a LoRa message\n\
     \x20 sta test|store <ssid> <psk> try or persist wifi credentials\n\
     \x20 app <name>                  switch the active application\n\
     \x20 service                     leave the support interface on next reset\n\
     \x20 reset                       reset the device\n\
     \x20 upgrade check|create|perform|stop\n\
     \x20 quit"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_parse_to_nothing() {
        assert_eq!(parse_line("").expect("blank"), None);
        assert_eq!(parse_line("   ").expect("blank"), None);
    }

    #[test]
    fn device_commands_parse_to_their_wire_forms() {
        assert_eq!(
            parse_line("get wifi").expect("parse"),
            Some(ConsoleCommand::Device(DeviceCommand::get("wifi")))
        );
        assert_eq!(
            parse_line("gps start").expect("parse"),
            Some(ConsoleCommand::Device(DeviceCommand::cmd(
                "start_gps",
                Vec::new()
            )))
        );
        assert_eq!(
            parse_line("lora send hello out there").expect("parse"),
            Some(ConsoleCommand::Device(DeviceCommand::cmd(
                "send_lora",
                vec![Value::from("hello out there")]
            )))
        );
        assert_eq!(
            parse_line("sta store net1 secret").expect("parse"),
            Some(ConsoleCommand::Device(DeviceCommand::cmd(
                "store_new_sta",
                vec![Value::from("net1"), Value::from("secret")]
            )))
        );
        assert_eq!(
            parse_line("app tracker").expect("parse"),
            Some(ConsoleCommand::Device(DeviceCommand::cmd(
                "switch_app",
                vec![Value::from("tracker")]
            )))
        );
    }

    #[test]
    fn upgrade_subcommands_parse() {
        assert_eq!(
            parse_line("upgrade check").expect("parse"),
            Some(ConsoleCommand::UpgradeCheck)
        );
        assert_eq!(
            parse_line("upgrade stop").expect("parse"),
            Some(ConsoleCommand::UpgradeStop)
        );
        assert!(parse_line("upgrade sideways").is_err());
    }

    #[test]
    fn incomplete_sta_collects_every_problem() {
        let problems = parse_line("sta test").expect_err("invalid");
        assert_eq!(
            problems,
            vec![
                "sta: ssid is required".to_string(),
                "sta: passphrase is required".to_string()
            ]
        );

        let problems = parse_line("sta").expect_err("invalid");
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn unknown_commands_are_rejected_with_a_hint() {
        let problems = parse_line("launch").expect_err("invalid");
        assert_eq!(problems, vec!["unknown command: launch (try `help`)"]);
    }

    #[test]
    fn destructive_commands_require_confirmation() {
        assert!(confirmation_prompt(&DeviceCommand::cmd("reset", Vec::new())).is_some());
        assert!(confirmation_prompt(&DeviceCommand::cmd("service", Vec::new())).is_some());
        assert!(confirmation_prompt(&DeviceCommand::get("wifi")).is_none());
        assert!(confirmation_prompt(&DeviceCommand::cmd("start_gps", Vec::new())).is_none());
    }
}
