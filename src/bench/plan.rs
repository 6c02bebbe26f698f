use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{
    page_capacity, BufferOptions, EngineConfig, DEFAULT_ENTRIES_PER_PAGE, DEFAULT_ENTRY_SIZE,
    DEFAULT_PAGES,
};
use crate::error::Result;
use crate::memtable::BufferKind;
use crate::workload::WorkloadSpec;

/// Engine settings for one replay, as given to the `run` subcommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// `-E`
    pub entry_size: usize,
    /// `-B`
    pub entries_per_page: usize,
    /// `-P`
    pub buffer_size_in_pages: usize,
    /// `-M`, overrides the page geometry when set
    pub buffer_size: Option<usize>,
    /// `-T`
    pub size_ratio: usize,
    /// `-l`
    pub prefix_length: usize,
    pub bucket_count: usize,
    pub threshold_use_skiplist: usize,
    /// `-A`
    pub preallocation: usize,
    /// `-d`
    pub destroy_db: bool,
    /// `--stat`
    pub print_stats: bool,
    /// Emit one log line per operation, not only the totals
    pub profile: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        let buffer = BufferOptions::default();
        Self {
            entry_size: DEFAULT_ENTRY_SIZE,
            entries_per_page: DEFAULT_ENTRIES_PER_PAGE,
            buffer_size_in_pages: DEFAULT_PAGES,
            buffer_size: None,
            size_ratio: 10,
            prefix_length: buffer.prefix_length,
            bucket_count: buffer.bucket_count,
            threshold_use_skiplist: buffer.threshold_use_skiplist,
            preallocation: buffer.preallocation,
            destroy_db: true,
            print_stats: false,
            profile: true,
        }
    }
}

impl RunOptions {
    pub fn buffer_capacity(&self) -> Result<usize> {
        match self.buffer_size {
            Some(bytes) => Ok(bytes),
            None => page_capacity(self.buffer_size_in_pages, self.entries_per_page, self.entry_size),
        }
    }

    pub fn engine_config(&self, kind: BufferKind, db_dir: &Path) -> Result<EngineConfig> {
        Ok(EngineConfig::new(db_dir)
            .size_ratio(self.size_ratio)
            .destroy_on_open(self.destroy_db)
            .profile(self.profile)
            .buffer(
                BufferOptions::new(kind)
                    .capacity(self.buffer_capacity()?)
                    .prefix_length(self.prefix_length)
                    .bucket_count(self.bucket_count)
                    .threshold_use_skiplist(self.threshold_use_skiplist)
                    .preallocation(self.preallocation),
            ))
    }
}

/// A run option varied across experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParam {
    SizeRatio,
    PrefixLength,
    BucketCount,
    /// Changes the generated entries as well as the page geometry.
    EntrySize,
    /// Buffer size in pages. Drops any explicit byte size.
    Pages,
}

impl SweepParam {
    /// The `run` flag the parameter sets, used in experiment names.
    pub fn flag(&self) -> &'static str {
        match self {
            SweepParam::SizeRatio => "T",
            SweepParam::PrefixLength => "l",
            SweepParam::BucketCount => "bucket_count",
            SweepParam::EntrySize => "E",
            SweepParam::Pages => "P",
        }
    }

    fn apply(&self, plan: &mut BenchPlan, value: usize) {
        let run = &mut plan.run;
        match self {
            SweepParam::SizeRatio => run.size_ratio = value,
            SweepParam::PrefixLength => run.prefix_length = value,
            SweepParam::BucketCount => run.bucket_count = value,
            SweepParam::EntrySize => {
                run.entry_size = value;
                for spec in &mut plan.workloads {
                    spec.entry_size = value;
                }
            }
            SweepParam::Pages => {
                run.buffer_size_in_pages = value;
                run.buffer_size = None;
            }
        }
    }
}

impl fmt::Display for SweepParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Values one parameter takes, one experiment each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub param: SweepParam,
    pub values: Vec<usize>,
}

impl Sweep {
    pub fn new(param: SweepParam, values: impl Into<Vec<usize>>) -> Self {
        Self {
            param,
            values: values.into(),
        }
    }
}

/// One point of a sweep: the plan with the swept values applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    /// Result subdirectory, e.g. `T-4` or `T-4_l-8`. Empty without sweeps.
    pub name: String,
    pub plan: BenchPlan,
}

/// Everything a benchmark session runs. Built once and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchPlan {
    implementations: Vec<BufferKind>,
    workloads: Vec<WorkloadSpec>,
    #[serde(default)]
    run: RunOptions,
    /// Expanded into the cartesian product of their values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sweeps: Vec<Sweep>,
}

impl Default for BenchPlan {
    /// Every strategy against a point query workload and a range query sweep.
    fn default() -> Self {
        let mut workloads = vec![WorkloadSpec::new(10_000).point_queries(500)];
        for selectivity in [0.1, 0.2, 0.3, 0.4] {
            workloads.push(WorkloadSpec::new(10_000).range_queries(100, selectivity));
        }
        Self {
            implementations: BufferKind::ALL.to_vec(),
            workloads,
            run: RunOptions::default(),
            sweeps: Vec::new(),
        }
    }
}

impl BenchPlan {
    pub fn new(implementations: Vec<BufferKind>, workloads: Vec<WorkloadSpec>) -> Self {
        Self {
            implementations,
            workloads,
            run: RunOptions::default(),
            sweeps: Vec::new(),
        }
    }

    /// Reads a plan from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn with_implementations(mut self, implementations: Vec<BufferKind>) -> Self {
        self.implementations = implementations;
        self
    }

    pub fn with_workloads(mut self, workloads: Vec<WorkloadSpec>) -> Self {
        self.workloads = workloads;
        self
    }

    pub fn with_run_options(mut self, run: RunOptions) -> Self {
        self.run = run;
        self
    }

    pub fn implementations(&self) -> &[BufferKind] {
        &self.implementations
    }

    pub fn workloads(&self) -> &[WorkloadSpec] {
        &self.workloads
    }

    /// Adds a parameter to vary. Sweeping a parameter twice keeps the last.
    pub fn with_sweep(mut self, sweep: Sweep) -> Self {
        self.sweeps.retain(|s| s.param != sweep.param);
        self.sweeps.push(sweep);
        self
    }

    pub fn run_options(&self) -> &RunOptions {
        &self.run
    }

    pub fn sweeps(&self) -> &[Sweep] {
        &self.sweeps
    }

    /// One experiment per combination of swept values, in sweep order.
    /// Without sweeps the plan itself is the only experiment.
    pub fn experiments(&self) -> Vec<Experiment> {
        let base = Self {
            sweeps: Vec::new(),
            ..self.clone()
        };
        let mut out = vec![Experiment {
            name: String::new(),
            plan: base,
        }];
        for sweep in &self.sweeps {
            out = out
                .iter()
                .flat_map(|exp| {
                    sweep.values.iter().map(move |&value| {
                        let mut plan = exp.plan.clone();
                        sweep.param.apply(&mut plan, value);
                        let point = format!("{}-{}", sweep.param, value);
                        let name = if exp.name.is_empty() {
                            point
                        } else {
                            format!("{}_{}", exp.name, point)
                        };
                        Experiment { name, plan }
                    })
                })
                .collect();
        }
        out
    }
}
