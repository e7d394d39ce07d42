//! A single module-extraction pass and every table it produces.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::block_naming::{BlockNamer, BlockNames};
use crate::call_correlation::{CallCorrelationBuilder, CallCorrelations};
use crate::control_flow::ControlFlowGraph;
use crate::data_flow_graph::{DataFlowGraph, DataFlowGraphBuilder};
use crate::def_use::{DefUseTable, DefUseTableBuilder};
use crate::emit::{self, EmissionReport};
use crate::extraction_config::ExtractionConfig;
use crate::il::Module;
use crate::location::{LocationResolver, Resolution, SourceLocation};
use crate::log::*;
use crate::variable_names::VariableNameResolver;

/// What the pass did to the module it was handed
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PassOutcome {
    /// The module was only read
    Unmodified,
}

/// The tables and graphs of one module. Created empty, filled by [`ExtractionSession::run`], and
/// handed to the emitter by [`ExtractionSession::emit`].
#[derive(Debug)]
pub struct ExtractionSession {
    config: ExtractionConfig,
    /// block name -> every in-scope line it contains
    pub block_lines: BTreeMap<String, BTreeSet<SourceLocation>>,
    /// line -> the first block (in visiting order) containing it
    pub line_blocks: BTreeMap<SourceLocation, String>,
    /// block name -> owning function
    pub block_function: BTreeMap<String, String>,
    /// function -> name of its entry block
    pub function_entry: BTreeMap<String, String>,
    /// file -> highest line seen in it
    pub max_line: BTreeMap<String, u32>,
    pub def_use: DefUseTable,
    pub calls: CallCorrelations,
    /// Graphs of functions with at least one named block, in module order
    pub cfgs: Vec<ControlFlowGraph>,
    /// Indexed like `cfgs`
    pub dfgs: Vec<DataFlowGraph>,
}

impl ExtractionSession {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            block_lines: Default::default(),
            line_blocks: Default::default(),
            block_function: Default::default(),
            function_entry: Default::default(),
            max_line: Default::default(),
            def_use: Default::default(),
            calls: Default::default(),
            cfgs: vec![],
            dfgs: vec![],
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run the extraction pass over `module`. Any tables left over from an earlier run are
    /// discarded first.
    pub fn run(&mut self, module: &Module) -> PassOutcome {
        *self = Self::new(self.config.clone());
        info!("Extracting flow information"; "module" => &module.name);

        let resolver = LocationResolver::new(&self.config);
        let locations: Vec<Resolution> = module
            .instructions
            .iter()
            .map(|i| resolver.resolve(i))
            .collect();

        let analyzed = module
            .function_ids()
            .filter(|&f| {
                let func = module.function(f);
                if self.config.is_blacklisted(&func.name) {
                    debug!("Skipping blacklisted function"; "function" => &func.name);
                    false
                } else {
                    !func.is_declaration()
                }
            })
            .collect::<Vec<_>>();

        for &f in &analyzed {
            for i in module.instructions_of(f) {
                if let Some(loc) = locations[i.index()].in_scope() {
                    let max = self.max_line.entry(loc.file.clone()).or_insert(0);
                    *max = (*max).max(loc.line);
                }
            }
        }

        let names = VariableNameResolver::new(module, self.config.max_search_depth);
        let namer = BlockNamer::new(module, &locations, self.config.unnamed_block_policy);
        let dfg_builder = DataFlowGraphBuilder::new(module, &locations, &names, &self.config);
        let mut block_names = BlockNames::new(module.blocks.len());

        for &f in &analyzed {
            let func = module.function(f);
            let named = namer.name_function(f, &mut block_names);
            for (bb, lines) in &named.blocks {
                let name = block_names
                    .get(*bb)
                    .expect("Blocks reported as named have a name");
                self.block_lines
                    .insert(name.to_owned(), lines.iter().cloned().collect());
                self.block_function
                    .insert(name.to_owned(), func.name.clone());
                for line in lines {
                    self.line_blocks
                        .entry(line.clone())
                        .or_insert_with(|| name.to_owned());
                }
            }
            if let Some(entry) = &named.entry {
                self.function_entry.insert(func.name.clone(), entry.clone());
            }

            match ControlFlowGraph::build(module, f, &named, &block_names) {
                Some(cfg) => {
                    self.cfgs.push(cfg);
                    self.dfgs.push(dfg_builder.build(f));
                }
                None => {
                    debug!("No named block; no graphs for function"; "function" => &func.name);
                }
            }
        }

        let du_builder = DefUseTableBuilder::new(module, &locations, &names, &self.config);
        let call_builder = CallCorrelationBuilder::new(module, &locations, &names, &self.config);
        for &f in &analyzed {
            du_builder.record(f, &mut self.def_use);
            call_builder.record(f, &mut self.calls);
        }

        info!("Extraction done";
              "functions" => analyzed.len(),
              "graphs" => self.cfgs.len(),
              "def_use_lines" => self.def_use.iter().count(),
              "call_sites" => self.calls.log_lines.len());
        PassOutcome::Unmodified
    }

    /// Write every artifact into `out_dir`. Failures are logged and reported, never fatal.
    pub fn emit(&self, out_dir: &Path) -> EmissionReport {
        emit::emit(self, out_dir)
    }
}
