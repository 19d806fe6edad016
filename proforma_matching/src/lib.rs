pub mod linkage;
pub mod matching;
pub mod models;
pub mod utils;
pub mod workbook;
