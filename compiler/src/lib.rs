// amc — Actor Machine Compiler
//
// Library root. Front end (lexer, parser, lower), checks and analyses
// (verify, scopes), the controller compiler and its emitters, and the
// runtime that executes compiled controllers.

pub mod am;
pub mod ast;
pub mod codegen;
pub mod controller;
pub mod diag;
pub mod dot;
pub mod id;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod runtime;
pub mod scopes;
pub mod settings;
pub mod verify;
