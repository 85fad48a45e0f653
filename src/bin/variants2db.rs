use famvar_base::{FamilyRegistry, PartitionConfig, Person, StoreSchema, VariantStore};
use famvar_base::{db, utils};

use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;
use std::{env, fs, process};

use getopts::Options;
use tracing::{info, Level};

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();

    // Parse arguments.
    let config = Config::new();
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(config.log_level()).init();

    // Check if the database already exists.
    if VariantStore::exists(&config.db_file) {
        if config.overwrite {
            eprintln!("Overwriting database {}", config.db_file);
            fs::remove_file(&config.db_file).map_err(|x| x.to_string())?;
        } else {
            return Err(format!("Database {} already exists", config.db_file));
        }
    }

    // Load the pedigree and the partition configuration.
    let families = read_pedigree(&config.pedigree_file)?;
    info!("Read {} families from {}", families.len(), config.pedigree_file);
    let partition = match &config.config_file {
        Some(filename) => PartitionConfig::load(filename)?,
        None => PartitionConfig::default(),
    };
    let schema = StoreSchema { real_attributes: config.real_attributes.clone(), ..StoreSchema::default() };

    // Read the variants before creating the database.
    let reader = utils::open_file(&config.variant_file)?;
    let batch = db::read_variant_table(reader, &families)?;
    info!("Read {} summary variants and {} family variants", batch.summary_variants.len(), batch.family_variants.len());

    // Create the database and import.
    VariantStore::create(&config.db_file, &partition, &schema).map_err(|x| x.to_string())?;
    let mut store = VariantStore::open(&config.db_file).map_err(|x| x.to_string())?;
    let mut family_list: Vec<Arc<_>> = families.iter().cloned().collect();
    family_list.sort_by(|a, b| a.family_id().cmp(b.family_id()));
    store.insert_families(&family_list).map_err(|x| x.to_string())?;
    store.import(&batch).map_err(|x| x.to_string())?;

    // Statistics.
    eprintln!(
        "The database contains {} families, {} summary variants, and {} family alleles",
        family_list.len(),
        store.summary_count().map_err(|x| x.to_string())?,
        store.family_allele_count().map_err(|x| x.to_string())?
    );
    if let Some(size) = store.file_size() {
        eprintln!("Database size: {}", size);
    }

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    eprintln!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

fn read_pedigree(filename: &str) -> Result<FamilyRegistry, String> {
    let reader = utils::open_file(filename)?;
    let mut persons = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|x| format!("{}: {}", filename, x))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let person = Person::from_ped_line(&line).map_err(|x| format!("{} line {}: {}", filename, line_num + 1, x))?;
        persons.push(person);
    }
    FamilyRegistry::from_persons(persons)
}

//-----------------------------------------------------------------------------

struct Config {
    pub pedigree_file: String,
    pub config_file: Option<String>,
    pub variant_file: String,
    pub db_file: String,
    pub real_attributes: Vec<String>,
    pub overwrite: bool,
    pub verbose: bool,
}

impl Config {
    pub fn new() -> Config {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optopt("p", "pedigree", "pedigree file (required)", "FILE");
        opts.optopt("c", "config", "partition configuration (TOML)", "FILE");
        opts.optopt("o", "output", "output file name (default: <input>.db)", "FILE");
        opts.optopt("a", "attributes", "comma-separated real-valued attributes stored as columns", "STR");
        opts.optflag("", "overwrite", "overwrite the database file if it exists");
        opts.optflag("v", "verbose", "print debug messages");
        let matches = match opts.parse(&args[1..]) {
            Ok(m) => m,
            Err(f) => {
                eprintln!("{}", f);
                process::exit(1);
            }
        };

        let header = format!("Usage: {} [options] variants.tsv[.gz]", program);
        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }

        let variant_file = if let Some(s) = matches.free.first() {
            s.clone()
        } else {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        };
        let pedigree_file = if let Some(s) = matches.opt_str("p") {
            s
        } else {
            eprintln!("Pedigree file must be provided with --pedigree");
            process::exit(1);
        };
        let db_file = matches.opt_str("o").unwrap_or_else(|| format!("{}.db", variant_file));
        let real_attributes = matches.opt_str("a").map(|s| {
            s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()
        }).unwrap_or_default();

        Config {
            pedigree_file,
            config_file: matches.opt_str("c"),
            variant_file,
            db_file,
            real_attributes,
            overwrite: matches.opt_present("overwrite"),
            verbose: matches.opt_present("v"),
        }
    }

    pub fn log_level(&self) -> Level {
        if self.verbose { Level::DEBUG } else { Level::INFO }
    }
}

//-----------------------------------------------------------------------------
