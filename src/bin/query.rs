use famvar_base::{ConnectionPool, ExecutorParams, QueryBuilder, QueryContext, QueryError, QueryExecutor, Region, VariantStore};
use famvar_base::query;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use std::{env, process};

use getopts::{Matches, Options};
use tracing::{debug, Level};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new()?;
    tracing_subscriber::fmt().with_writer(io::stderr).with_max_level(config.log_level()).init();

    // Open the database and compile the query.
    let store = VariantStore::open(&config.filename).map_err(|x| x.to_string())?;
    let families = store.load_families().map_err(|x| x.to_string())?;
    let context = store.sqlite_context();
    let compiled = config.builder(&context).build().map_err(|x| x.to_string())?;
    if config.print_sql {
        eprintln!("{}", compiled.inline_sql());
    }
    if let Some(partitions) = compiled.partitions.as_ref() {
        debug!("Query touches {} region partitions", partitions.len());
    }
    drop(store);

    // Run the query.
    let params = ExecutorParams { workers: 1, ..ExecutorParams::default() };
    let pool = ConnectionPool::open(&config.filename, params.pool_size).map_err(|x| x.to_string())?;
    let executor = QueryExecutor::new(pool, Arc::new(families), params);
    let mut handle = executor.submit(compiled);

    let mut failure: Option<QueryError> = None;
    let mut output = io::stdout().lock();
    let mut count = 0;
    {
        let rows = handle.by_ref().map_while(|item| match item {
            Ok(row) => Some(row),
            Err(err) => {
                failure = Some(err);
                None
            },
        });
        for result in query::coalesce_rows(rows) {
            let alleles: Vec<String> = result.matched_alleles().iter().map(|x| x.to_string()).collect();
            let written = writeln!(output, "{}\t{}", result, alleles.join(","));
            if written.is_err() {
                // The consumer went away.
                break;
            }
            count += 1;
        }
    }
    handle.close();
    if let Some(err) = failure {
        return Err(err.to_string());
    }
    output.flush().map_err(|x| x.to_string())?;

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    eprintln!("Found {} variants in {:.3} seconds", count, seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

pub struct Config {
    pub filename: String,
    pub summary: bool,
    pub regions: Vec<Region>,
    pub genes: Vec<String>,
    pub effect_types: Vec<String>,
    pub family_ids: Vec<String>,
    pub person_ids: Vec<String>,
    pub roles: Option<String>,
    pub sexes: Option<String>,
    pub statuses: Option<String>,
    pub inheritance: Option<String>,
    pub variant_type: Option<String>,
    pub min_freq: Option<f64>,
    pub max_freq: Option<f64>,
    pub ultra_rare: bool,
    pub return_reference: bool,
    pub return_unknown: bool,
    pub pruning: bool,
    pub limit: Option<usize>,
    pub print_sql: bool,
    pub verbose: bool,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optflag("s", "summary", "query summary variants instead of family variants");
        opts.optmulti("r", "region", "region chrom[:start[-end]] (may repeat)", "STR");
        opts.optmulti("g", "gene", "gene symbol (may repeat)", "STR");
        opts.optmulti("e", "effect", "effect type or group (may repeat)", "STR");
        opts.optmulti("f", "family", "family id (may repeat)", "STR");
        opts.optmulti("p", "person", "person id (may repeat)", "STR");
        opts.optopt("", "role", "role filter, e.g. \"prb and not sib\"", "EXPR");
        opts.optopt("", "sex", "sex filter", "EXPR");
        opts.optopt("", "status", "status filter", "EXPR");
        opts.optopt("", "inheritance", "inheritance filter, e.g. \"denovo or omission\"", "EXPR");
        opts.optopt("", "variant-type", "variant type filter, e.g. \"sub or ins\"", "EXPR");
        opts.optopt("", "min-freq", "minimum allele frequency (percent)", "FLOAT");
        opts.optopt("", "max-freq", "maximum allele frequency (percent)", "FLOAT");
        opts.optflag("", "ultra-rare", "only alleles seen at most once");
        opts.optflag("", "return-reference", "include reference alleles");
        opts.optflag("", "return-unknown", "include alleles with unknown inheritance");
        opts.optflag("", "no-pruning", "do not use partition bins");
        opts.optopt("l", "limit", "maximum number of rows", "INT");
        opts.optflag("", "print-sql", "print the compiled query to stderr");
        opts.optflag("v", "verbose", "print debug messages");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        let header = format!("Usage: {} [options] variants.db", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        let filename = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };

        let mut regions = Vec::new();
        for region in matches.opt_strs("r") {
            regions.push(Region::parse(&region).map_err(|x| format!("--region: {}", x))?);
        }
        let limit = match matches.opt_str("l") {
            Some(s) => Some(s.parse::<usize>().map_err(|x| format!("--limit: {}", x))?),
            None => None,
        };

        Ok(Config {
            filename,
            summary: matches.opt_present("s"),
            regions,
            genes: Self::list(&matches, "g"),
            effect_types: Self::list(&matches, "e"),
            family_ids: Self::list(&matches, "f"),
            person_ids: Self::list(&matches, "p"),
            roles: matches.opt_str("role"),
            sexes: matches.opt_str("sex"),
            statuses: matches.opt_str("status"),
            inheritance: matches.opt_str("inheritance"),
            variant_type: matches.opt_str("variant-type"),
            min_freq: Self::float(&matches, "min-freq")?,
            max_freq: Self::float(&matches, "max-freq")?,
            ultra_rare: matches.opt_present("ultra-rare"),
            return_reference: matches.opt_present("return-reference"),
            return_unknown: matches.opt_present("return-unknown"),
            pruning: !matches.opt_present("no-pruning"),
            limit,
            print_sql: matches.opt_present("print-sql"),
            verbose: matches.opt_present("v"),
        })
    }

    // Repeated options, also accepting comma-separated values.
    fn list(matches: &Matches, name: &str) -> Vec<String> {
        matches.opt_strs(name).iter()
            .flat_map(|x| x.split(','))
            .map(|x| x.trim().to_string())
            .filter(|x| !x.is_empty())
            .collect()
    }

    fn float(matches: &Matches, name: &str) -> Result<Option<f64>, String> {
        match matches.opt_str(name) {
            Some(s) => Ok(Some(s.parse::<f64>().map_err(|x| format!("--{}: {}", name, x))?)),
            None => Ok(None),
        }
    }

    pub fn builder<'a>(&self, context: &'a QueryContext) -> QueryBuilder<'a> {
        let mut builder = if self.summary { QueryBuilder::summary(context) } else { QueryBuilder::family(context) };
        if !self.regions.is_empty() {
            builder = builder.with_regions(self.regions.clone());
        }
        if !self.genes.is_empty() {
            builder = builder.with_genes(&self.genes);
        }
        if !self.effect_types.is_empty() {
            builder = builder.with_effect_types(&self.effect_types);
        }
        if !self.family_ids.is_empty() {
            builder = builder.with_family_ids(&self.family_ids);
        }
        if !self.person_ids.is_empty() {
            builder = builder.with_person_ids(&self.person_ids);
        }
        if let Some(filter) = self.roles.as_ref() {
            builder = builder.with_roles(filter);
        }
        if let Some(filter) = self.sexes.as_ref() {
            builder = builder.with_sexes(filter);
        }
        if let Some(filter) = self.statuses.as_ref() {
            builder = builder.with_statuses(filter);
        }
        if let Some(filter) = self.inheritance.as_ref() {
            builder = builder.with_inheritance(filter);
        }
        if let Some(filter) = self.variant_type.as_ref() {
            builder = builder.with_variant_type(filter);
        }
        if self.min_freq.is_some() || self.max_freq.is_some() {
            builder = builder.with_frequency_range(self.min_freq, self.max_freq);
        }
        builder
            .with_ultra_rare(self.ultra_rare)
            .with_return_reference(self.return_reference)
            .with_return_unknown(self.return_unknown)
            .with_pruning(self.pruning)
            .with_limit(self.limit)
    }

    pub fn log_level(&self) -> Level {
        if self.verbose { Level::DEBUG } else { Level::WARN }
    }
}

//-----------------------------------------------------------------------------
