mod params;

pub use params::{build_header_map, parse_params};
