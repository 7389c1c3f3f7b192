pub mod executable;
pub mod output_parser;
pub mod supervisor;
