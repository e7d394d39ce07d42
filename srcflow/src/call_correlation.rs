//! Correlate the formal parameters of callees with the source variables feeding each call site.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::extraction_config::ExtractionConfig;
use crate::il::{FuncId, Module, Opcode};
use crate::location::{Resolution, SourceLocation};
use crate::log::*;
use crate::variable_names::VariableNameResolver;

/// Formal parameter name to the variables contributing to the matching actual argument
pub type FormalBindings = BTreeMap<String, BTreeSet<String>>;

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CallCorrelations {
    /// callee -> call site -> bindings
    pub by_callee: BTreeMap<String, BTreeMap<SourceLocation, FormalBindings>>,
    /// call site -> callee -> bindings; the same data as `by_callee`
    pub by_site: BTreeMap<SourceLocation, BTreeMap<String, FormalBindings>>,
    /// One `file:line-callee-formal:var,...` line per resolved call, in visiting order
    pub log_lines: Vec<String>,
}

impl CallCorrelations {
    /// Record one call; `ordered` lists the named formals in declaration order
    fn record(
        &mut self,
        site: &SourceLocation,
        callee: &str,
        ordered: Vec<(String, BTreeSet<String>)>,
    ) {
        let pairs = ordered
            .iter()
            .flat_map(|(formal, vars)| vars.iter().map(move |v| format!("{}:{}", formal, v)))
            .join(",");
        self.log_lines
            .push(format!("{}-{}-{}", site, callee, pairs));

        let bindings: FormalBindings = ordered.into_iter().collect();

        merge(
            self.by_callee
                .entry(callee.to_owned())
                .or_default()
                .entry(site.clone())
                .or_default(),
            &bindings,
        );
        merge(
            self.by_site
                .entry(site.clone())
                .or_default()
                .entry(callee.to_owned())
                .or_default(),
            &bindings,
        );
    }
}

/// Union `bindings` into `target`; repeated calls from the same site accumulate
fn merge(target: &mut FormalBindings, bindings: &FormalBindings) {
    for (formal, vars) in bindings {
        target
            .entry(formal.clone())
            .or_default()
            .extend(vars.iter().cloned());
    }
}

pub struct CallCorrelationBuilder<'a> {
    module: &'a Module,
    locations: &'a [Resolution],
    names: &'a VariableNameResolver<'a>,
    config: &'a ExtractionConfig,
}

impl<'a> CallCorrelationBuilder<'a> {
    pub fn new(
        module: &'a Module,
        locations: &'a [Resolution],
        names: &'a VariableNameResolver<'a>,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            module,
            locations,
            names,
            config,
        }
    }

    /// Add every resolvable call of `f` into `calls`
    pub fn record(&self, f: FuncId, calls: &mut CallCorrelations) {
        for i in self.module.instructions_of(f) {
            let insn = self.module.insn(i);
            if insn.opcode != Opcode::Call {
                continue;
            }
            let site = match self.locations[i.index()].in_scope() {
                Some(site) => site,
                None => continue,
            };
            let callee_name = match &insn.callee {
                Some(c) if !self.config.is_blacklisted(c) => c,
                Some(_) => continue,
                None => {
                    trace!("Skipping indirect call"; "site" => %site);
                    continue;
                }
            };
            let callee = match self.module.function_by_name(callee_name) {
                Some(callee) => callee,
                None => {
                    debug!("Skipping call to unknown function";
                           "callee" => callee_name, "site" => %site);
                    continue;
                }
            };
            if callee.params.len() != insn.operands.len() {
                debug!("Argument count mismatch; correlating the common prefix";
                       "callee" => callee_name, "site" => %site,
                       "formals" => callee.params.len(), "actuals" => insn.operands.len());
            }
            let ordered = callee
                .params
                .iter()
                .zip(&insn.operands)
                .filter_map(|(formal, actual)| {
                    Some((formal.clone()?, self.names.resolve_contributors(actual)))
                })
                .collect();
            calls.record(site, callee_name, ordered);
        }
    }
}
