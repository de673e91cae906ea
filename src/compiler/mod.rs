//! Script Compiler (C7): assembles the filter, NAT, and conditional
//! mangle table scripts for one config snapshot.

pub mod filter;
pub mod mangle;
pub mod nat;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::Config;
use crate::optimizer::OptLevel;

pub struct CompileOutput {
    pub filter: String,
    pub nat: String,
    pub mangle: Option<String>,
}

impl CompileOutput {
    /// Concatenates every emitted table fragment into the single script
    /// submitted to the loader for one transaction.
    pub fn combined(&self) -> String {
        let mut out = self.filter.clone();
        out.push_str(&self.nat);
        if let Some(mangle) = &self.mangle {
            out.push_str(mangle);
        }
        out
    }
}

pub fn compile_config(
    cfg: &Config,
    apply_count: u64,
    config_hash: &str,
    now: DateTime<Utc>,
    opt_level: OptLevel,
) -> Result<CompileOutput> {
    let filter = filter::compile_filter_table(&filter::FilterCompileInputs {
        cfg,
        apply_count,
        config_hash,
        now,
        opt_level,
    })?;
    let nat = nat::compile_nat_table(cfg)?;
    let mangle = mangle::compile_mangle_table(cfg)?;

    Ok(CompileOutput { filter, nat, mangle })
}
