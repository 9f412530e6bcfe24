//! Command token parsing.

/// A message body split into command name and argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: &'a str,
    pub argument: &'a str,
}

/// Parse `<prefix><name> <rest...>`.
///
/// The body up to its first space must start with `prefix`; the name is
/// that token without the prefix (possibly empty). The argument is
/// everything after that single space, verbatim. Leading whitespace in the
/// body means the message is not a command.
#[must_use]
pub fn parse_command<'a>(body: &'a str, prefix: &str) -> Option<ParsedCommand<'a>> {
    let (token, rest) = body.split_once(' ').unwrap_or((body, ""));

    let name = token.strip_prefix(prefix)?;
    Some(ParsedCommand {
        name,
        argument: rest,
    })
}
