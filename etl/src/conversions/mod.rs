pub mod numeric;
pub mod table_row;
