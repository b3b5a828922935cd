pub mod dictionary;
pub mod morphology;
pub mod stopwords;
pub mod wordforms;
pub mod writer;
