//! The flat key-value configuration format describing EDB tables.
//!
//! Each relevant line is `EDB<N>_<key>=<value>` where `N` indexes a table
//! descriptor and `<key>` is `predname`, `type`, or `param<K>`. Lines not
//! starting with `EDB` are ignored. Descriptors may arrive out of order; the
//! list grows to cover the largest id seen.

use std::path::Path;

use crate::error::{Error, Result};


/// One table descriptor: a predicate name, the backend type that stores it,
/// and the backend's positional parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableConf {
    pub predname: String,
    pub backend_type: String,
    pub params: Vec<String>,
}

/// A parsed configuration: the list of table descriptors, indexed by the
/// `N` of their `EDB<N>_...` lines.
#[derive(Debug, Default)]
pub struct EdbConf {
    tables: Vec<TableConf>,
}

impl EdbConf {
    pub fn parse(text: &str) -> Result<EdbConf> {
        let mut tables: Vec<TableConf> = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let Some(rest) = line.strip_prefix("EDB") else {
                continue;
            };
            let malformed = || Error::Config {
                line_no: line_no + 1,
                line: line.to_string(),
            };
            let underscore = rest.find('_').ok_or_else(malformed)?;
            let id: usize = rest[..underscore].parse().map_err(|_| malformed())?;
            if tables.len() <= id {
                tables.resize_with(id + 1, TableConf::default);
            }
            let table = &mut tables[id];

            let entry = &rest[underscore + 1..];
            let eq = entry.find('=').ok_or_else(malformed)?;
            let (key, value) = (&entry[..eq], &entry[eq + 1..]);
            if key == "predname" {
                table.predname = value.to_string();
            } else if key == "type" {
                table.backend_type = value.to_string();
            } else if let Some(param) = key.strip_prefix("param") {
                let param_id: usize = param.parse().map_err(|_| malformed())?;
                if table.params.len() <= param_id {
                    table.params.resize(param_id + 1, String::new());
                }
                table.params[param_id] = value.to_string();
            } else {
                return Err(malformed());
            }
        }
        log::debug!("parsed {} edb table descriptor(s)", tables.len());
        Ok(EdbConf { tables })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<EdbConf> {
        EdbConf::parse(&std::fs::read_to_string(path)?)
    }

    pub fn tables(&self) -> &[TableConf] {
        &self.tables
    }
}
