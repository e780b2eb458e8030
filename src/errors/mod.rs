mod convert_error;

pub use convert_error::ConvertError;
