//! Line commands typed at the terminal

use rust_decimal::Decimal;

use mura_core::{ContractType, MuraError, MuraResult};
use mura_services::SessionCommand;

pub const HELP: &str = "\
commands:
  mount <feature>            show a feature (markets, trading, balance, orders, history, limits)
  unmount <feature>          hide a feature
  retry <feature>            clear a feature's error and reload it
  watch <symbol>             live quote on the markets page
  select <symbol>            symbol to trade
  buy <CALL|PUT> <amount> <minutes>
  status                     print the dashboard
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Session(SessionCommand),
    Status,
    Help,
}

/// Parse one line; blank lines yield `None`
pub fn parse(line: &str) -> MuraResult<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match (verb.to_lowercase().as_str(), args.as_slice()) {
        ("mount", [feature]) => Input::Session(SessionCommand::Mount(feature.parse()?)),
        ("unmount", [feature]) => Input::Session(SessionCommand::Unmount(feature.parse()?)),
        ("retry", [feature]) => Input::Session(SessionCommand::Retry(feature.parse()?)),
        ("watch", [symbol]) => Input::Session(SessionCommand::SelectMarket(symbol.to_string())),
        ("select", [symbol]) => {
            Input::Session(SessionCommand::SelectTradingSymbol(symbol.to_string()))
        }
        ("buy", [contract_type, amount, duration]) => Input::Session(SessionCommand::PlaceTrade {
            contract_type: contract_type
                .parse::<ContractType>()
                .map_err(MuraError::invalid_request)?,
            amount: amount
                .parse::<Decimal>()
                .map_err(|e| MuraError::invalid_request(format!("amount: {}", e)))?,
            duration: duration
                .parse::<u32>()
                .map_err(|e| MuraError::invalid_request(format!("duration: {}", e)))?,
        }),
        ("status", []) => Input::Status,
        ("help", []) | ("?", []) => Input::Help,
        ("quit", []) | ("exit", []) => Input::Session(SessionCommand::Shutdown),
        (verb, _) => {
            return Err(MuraError::invalid_request(format!(
                "Unrecognized command `{}` (try `help`)",
                verb
            )))
        }
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mura_services::FeatureKind;

    #[test]
    fn test_feature_commands() {
        assert_eq!(
            parse("mount orders").unwrap(),
            Some(Input::Session(SessionCommand::Mount(FeatureKind::Portfolio)))
        );
        assert_eq!(
            parse("  RETRY history ").unwrap(),
            Some(Input::Session(SessionCommand::Retry(FeatureKind::History)))
        );
        assert!(parse("mount profile").is_err());
        assert!(parse("mount").is_err());
    }

    #[test]
    fn test_buy() {
        assert_eq!(
            parse("buy call 10 5").unwrap(),
            Some(Input::Session(SessionCommand::PlaceTrade {
                contract_type: ContractType::Call,
                amount: Decimal::from(10),
                duration: 5,
            }))
        );
        assert!(parse("buy sideways 10 5").is_err());
        assert!(parse("buy PUT ten 5").is_err());
        assert!(parse("buy PUT 10 -1").is_err());
    }

    #[test]
    fn test_misc() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("status").unwrap(), Some(Input::Status));
        assert_eq!(
            parse("quit").unwrap(),
            Some(Input::Session(SessionCommand::Shutdown))
        );
        assert_eq!(
            parse("watch R_100").unwrap(),
            Some(Input::Session(SessionCommand::SelectMarket("R_100".to_string())))
        );
        assert!(parse("dance").is_err());
    }

    #[test]
    fn test_help_names_duration_unit() {
        let buy = HELP.lines().find(|line| line.trim_start().starts_with("buy")).unwrap();
        assert!(buy.contains("<minutes>"));
        assert!(!buy.contains("<ticks>"));
    }
}
