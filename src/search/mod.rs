pub mod context;
pub mod filter;
pub mod matcher;
pub mod qword;
pub mod scan;
pub mod wildcard;
pub mod wordlist;
