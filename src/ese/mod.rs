//! ESE database binary format parsing.
//!
//! This module contains types and functions for reading the on-disk
//! structures of the Extensible Storage Engine: the file header, fixed-size
//! pages with their reverse-ordered tag arrays, B+-tree page trees, the
//! catalog (object id 2) describing every table, space trees, records, and
//! multi-segment long values.
//!
//! Start with [`database::Database`] to open an `.edb` file, then use
//! [`page::Page`] and [`page_tree::PageTree`] to inspect individual
//! structures.

pub mod cache;
pub mod catalog;
pub mod checksum;
pub mod codepage;
pub mod constants;
pub mod database;
pub mod header;
pub mod long_value;
pub mod page;
pub mod page_tree;
pub mod record;
pub mod space_tree;
pub mod source;
pub mod value;
