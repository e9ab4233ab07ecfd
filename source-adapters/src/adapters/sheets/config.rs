pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com";

/// MIME type Drive reports for native spreadsheets
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Widest column range read from a sheet
pub const LAST_COLUMN: &str = "ZZ";

/// Spreadsheet and Drive API base URLs.
#[derive(Clone, Debug)]
pub struct SheetsEndpoints {
    pub sheets_base_url: String,
    pub drive_base_url: String,
}

impl Default for SheetsEndpoints {
    fn default() -> Self {
        Self {
            sheets_base_url: SHEETS_BASE_URL.to_string(),
            drive_base_url: DRIVE_BASE_URL.to_string(),
        }
    }
}

/// A1 range covering a whole sheet, or its first `rows` rows.
///
/// Sheet titles are always quoted; embedded quotes are doubled.
pub fn sheet_range(sheet: &str, rows: Option<usize>) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    match rows {
        Some(n) => format!("{}!A1:{}{}", quoted, LAST_COLUMN, n),
        None => quoted,
    }
}

/// A1 range of one row.
pub fn row_range(sheet: &str, row_number: usize) -> String {
    format!(
        "'{}'!A{}:{}{}",
        sheet.replace('\'', "''"),
        row_number,
        LAST_COLUMN,
        row_number
    )
}

/// Sheet row number from an A1 range such as `'Sheet 1'!A5:E5`.
pub fn first_row_of_range(range: &str) -> Option<usize> {
    let cells = range.rsplit_once('!').map(|(_, c)| c).unwrap_or(range);
    let start = cells.split(':').next()?;
    let digits: String = start.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    digits.parse().ok()
}
