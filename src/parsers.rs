//! Format inference and per-format text pre-parsers.
//!
//! The table is fixed at compile time. Unknown formats fall back to the
//! generic passthrough parser.

pub type ParserFn = fn(&str) -> String;

pub const PARSER_GENERIC: &str = "generic";
pub const PARSER_GZIP: &str = "gz";

const PARSERS: &[(&str, ParserFn)] = &[
    ("", generic_parser),
    (PARSER_GENERIC, generic_parser),
    (PARSER_GZIP, generic_parser),
    ("txt", text_parser),
    ("txt.gz", text_parser),
    ("soft", text_parser),
    ("soft.gz", text_parser),
];

/// Maps alternate extensions onto the key they share a parser with.
const FORMAT_ALIASES: &[(&str, &str)] = &[("tsv", "txt"), ("tsv.gz", "txt.gz")];

/// Everything after the first `.` of the filename, unless `explicit` is given.
pub fn infer_format(filename: &str, explicit: Option<&str>) -> String {
    if let Some(format) = explicit {
        return format.to_string();
    }
    let ext = filename
        .split_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default();
    FORMAT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == ext)
        .map(|(_, key)| key.to_string())
        .unwrap_or_else(|| ext.to_string())
}

pub fn get_parser(format: &str) -> ParserFn {
    PARSERS
        .iter()
        .find(|(key, _)| *key == format)
        .map(|(_, parser)| *parser)
        .unwrap_or(generic_parser)
}

pub fn parse_format(data: &str, format: &str) -> String {
    get_parser(format)(data)
}

pub fn generic_parser(data: &str) -> String {
    data.to_string()
}

/// Drops blank lines.
pub fn text_parser(data: &str) -> String {
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
