use std::error::Error;

use serde_json::Value;

use crate::error::AdapterErrorCode;

pub struct LineInput<'a> {
    pub line: &'a str,
    /// Already-decoded JSON for `line`, when the caller has it.
    pub json: Option<&'a Value>,
}

pub trait LineParser {
    type Event;
    type Error: ClassifiedParserError;

    fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error>;
}

pub trait ClassifiedParserError: Error {
    fn code(&self) -> AdapterErrorCode;
    fn redacted_summary(&self) -> String;
    fn full_details(&self) -> String;
}
