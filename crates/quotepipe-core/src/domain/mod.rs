mod record;
mod symbol;

pub use record::{format_date, parse_date, volume_from_f64, PriceRecord, RawQuote};
pub use symbol::Symbol;
