pub mod condition;
pub mod config;
pub mod domain;
pub mod engine;
pub mod entities;
pub mod error;
pub mod hydrate;
pub mod jobs;
pub mod ontology;
pub mod output;
pub mod poll;
pub mod query;
pub mod response;
pub mod service;
pub mod variants;
