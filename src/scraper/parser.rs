use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::types::{EconomicEvent, Impact};

/// Parses rendered calendar HTML into economic events.
///
/// The source's table omits the date cell on rows sharing a date with the
/// previous row, and omits the time cell on rows sharing a time, so parsing
/// walks rows top to bottom carrying both forward.
pub struct CalendarParser {
    // Selectors are compiled once and reused
    row_selector: Selector,
    date_selector: Selector,
    currency_selector: Selector,
    impact_selector: Selector,
    event_selector: Selector,
    time_selector: Selector,
    actual_selector: Selector,
    forecast_selector: Selector,
    previous_selector: Selector,
}

/// What the time cell of a row says.
enum RowTime {
    /// Cell empty: share the previous row's time.
    Carried,
    AllDay,
    Tentative,
    At(NaiveTime),
}

impl CalendarParser {
    pub fn new() -> Result<Self, ScrapeError> {
        let sel = |s: &str| {
            Selector::parse(s).map_err(|e| ScrapeError::PageStructure(format!("selector {s}: {e}")))
        };
        Ok(Self {
            // data-event-id marks actual event rows (vs. day headers)
            row_selector: sel("tr[data-event-id]")?,
            date_selector: sel("td.calendar__date")?,
            currency_selector: sel("td.calendar__currency")?,
            impact_selector: sel("td.calendar__impact span")?,
            event_selector: sel("td.calendar__event span.calendar__event-title")?,
            time_selector: sel("td.calendar__time")?,
            actual_selector: sel("td.calendar__actual")?,
            forecast_selector: sel("td.calendar__forecast")?,
            previous_selector: sel("td.calendar__previous")?,
        })
    }

    /// Parse a week page into events sorted by UTC timestamp.
    ///
    /// `base_date` anchors the year (the source prints dates without one)
    /// and is the fallback date for rows preceding the first date cell.
    pub fn parse(
        &self,
        html: &str,
        base_date: NaiveDate,
    ) -> Result<Vec<EconomicEvent>, ScrapeError> {
        debug!("Parsing HTML of {} bytes for date {base_date}", html.len());
        let document = Html::parse_document(html);

        if !html.contains("calendar__table") {
            return Err(ScrapeError::PageStructure(
                "calendar table missing from document".into(),
            ));
        }

        let mut events = Vec::new();
        let mut current_date = base_date;
        let mut current_time: Option<NaiveTime> = None;
        let reference_year = base_date.year();

        for row in document.select(&self.row_selector) {
            match self.parse_row(&row, &mut current_date, &mut current_time, reference_year) {
                Ok(Some(event)) => {
                    debug!(
                        "Parsed event: {} ({}) - {}",
                        event.name, event.currency, event.impact
                    );
                    events.push(event);
                }
                Ok(None) => continue,
                Err(reason) => {
                    // A bad row never sinks the week
                    warn!("Skipping unparseable calendar row: {reason}");
                    continue;
                }
            }
        }

        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Parse a single table row. Returns Ok(None) for rows carrying no
    /// event data (spacers, headers).
    fn parse_row(
        &self,
        row: &scraper::ElementRef,
        current_date: &mut NaiveDate,
        current_time: &mut Option<NaiveTime>,
        reference_year: i32,
    ) -> Result<Option<EconomicEvent>, String> {
        // A populated date cell starts a new day; carried time resets.
        let date_text = self.extract_text(row, &self.date_selector);
        if let Some(parsed_date) = parse_date(&date_text, reference_year) {
            *current_date = parsed_date;
            *current_time = None;
        }

        let currency = self.extract_text(row, &self.currency_selector);
        if currency.is_empty() {
            return Ok(None);
        }

        let name = self.extract_text(row, &self.event_selector);
        if name.is_empty() {
            return Ok(None);
        }

        let impact = self
            .extract_impact(row)
            .unwrap_or(Impact::Low);

        let time_text = self.extract_text(row, &self.time_selector);
        let (time, tentative) = match classify_time(&time_text) {
            RowTime::At(t) => {
                *current_time = Some(t);
                (t, false)
            }
            RowTime::Carried => (
                current_time.unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
                false,
            ),
            RowTime::AllDay => (NaiveTime::from_hms_opt(0, 0, 0).unwrap(), false),
            RowTime::Tentative => (NaiveTime::from_hms_opt(0, 0, 0).unwrap(), true),
        };

        let naive = NaiveDateTime::new(*current_date, time);
        let timestamp = eastern_to_utc(naive);

        let mut event = EconomicEvent::scraped(timestamp, currency, name, impact);
        event.tentative = tentative;
        event.actual = non_empty(self.extract_text(row, &self.actual_selector));
        event.forecast = non_empty(self.extract_text(row, &self.forecast_selector));
        event.previous = non_empty(self.extract_text(row, &self.previous_selector));
        Ok(Some(event))
    }

    fn extract_text(&self, row: &scraper::ElementRef, selector: &Selector) -> String {
        row.select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    fn extract_impact(&self, row: &scraper::ElementRef) -> Option<Impact> {
        row.select(&self.impact_selector)
            .next()
            .and_then(|el| el.value().attr("class"))
            .map(Impact::from_marker_class)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn classify_time(time_text: &str) -> RowTime {
    let trimmed = time_text.trim();
    if trimmed.is_empty() {
        return RowTime::Carried;
    }
    if trimmed.eq_ignore_ascii_case("All Day") {
        return RowTime::AllDay;
    }
    if trimmed.eq_ignore_ascii_case("Tentative") {
        return RowTime::Tentative;
    }
    match parse_time(trimmed) {
        Some(t) => RowTime::At(t),
        // Unrecognized sentinel ("Day 2" etc.): share the carried slot
        None => RowTime::Carried,
    }
}

/// The source renders times in US-Eastern wall clock. Convert DST-aware;
/// ambiguous fall-back instants resolve to the first occurrence, and the
/// (never-emitted) spring gap falls back to reading the wall clock as UTC.
fn eastern_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    New_York
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Parse the source's date cell, e.g. "Tue Jan 13" (sometimes "TueJan 13").
/// The year never appears and must come from the requested week.
fn parse_date(date_str: &str, reference_year: i32) -> Option<NaiveDate> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    let parts: Vec<&str> = date_str.split_whitespace().collect();
    let (month_str, day_str) = match parts.len() {
        3 => (parts[1], parts[2]),
        2 => {
            // Day name concatenated with month: "TueJan 13"
            let first = parts[0];
            if first.len() >= 6 {
                (&first[3..], parts[1])
            } else {
                return None;
            }
        }
        _ => return None,
    };

    let month = match month_str.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };

    let day: u32 = day_str.parse().ok()?;
    NaiveDate::from_ymd_opt(reference_year, month, day)
}

/// Parse the source's clock format: "8:30am", "2:00pm", "12:30am".
fn parse_time(time_str: &str) -> Option<NaiveTime> {
    let time_str = time_str.trim().to_lowercase();

    if let Ok(time) = NaiveTime::parse_from_str(&time_str, "%l:%M%P") {
        return Some(time);
    }
    if let Ok(time) = NaiveTime::parse_from_str(&time_str, "%I:%M%P") {
        return Some(time);
    }
    if let Ok(time) = NaiveTime::parse_from_str(&time_str, "%H:%M") {
        return Some(time);
    }

    None
}
