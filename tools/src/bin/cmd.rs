// Command line utility for pseudo-cell generation, posterior methylation rates and the
// external browser and motif tools

use anyhow::{bail, Context, Error};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ext_tools::{FimoScanner, Interval, JBrowse, MotifScanner};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use mc_rate::calculate_posterior_mc_rate;
use ndarray::prelude::*;
use pseudo_cell::mtx::{load_mtx, write_mtx_gz};
use pseudo_cell::{generate_pseudo_cells, AggregateFunc, AggregationMat, PseudoCellConfig, ReducedMatrix};
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tools::io::{read_clusters, read_labeled_csv, write_cell_labels, write_labeled_csv, write_obs, LabeledMatrix};

pub fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("pseudo-cell-cmd")
        .subcommand_required(true)
        .subcommand(pseudo_command())
        .subcommand(post_rate_command())
        .subcommand(jbrowse_command())
        .subcommand(motif_command())
        .get_matches();

    match matches.subcommand() {
        Some(("pseudo", m)) => run_pseudo(m),
        Some(("post-rate", m)) => run_post_rate(m),
        Some(("jbrowse", m)) => run_jbrowse(m),
        Some(("motif", m)) => run_motif(m),
        _ => unreachable!("subcommand is required"),
    }
}

fn out_dir_arg() -> Arg {
    Arg::new("OUT_DIR")
        .help("Output directory")
        .short('o')
        .long("out_dir")
        .default_value(".")
        .value_parser(value_parser!(PathBuf))
}

fn pseudo_command() -> Command {
    Command::new("pseudo")
        .about("Collapse cells into size-bounded pseudo-cells within each cluster")
        .arg(
            Arg::new("EMBEDDING")
                .help("CSV of cell embeddings (e.g. PCs), cell id in the first column")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CLUSTERS")
                .help("CSV with cell and cluster columns")
                .required(true)
                .index(2)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("FEATURES")
                .help("Matrix to aggregate: .mtx[.gz] with rows in embedding order, or a CSV keyed by cell id. Defaults to the embedding")
                .short('f')
                .long("features")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON config; the options below override it")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PSEUDOABLE_CLUSTER_SIZE")
                .help("Cells per unit of pseudo-cell size")
                .long("pseudoable_cluster_size")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("MAX_PSEUDO_SIZE")
                .help("Largest allowed pseudo-cell")
                .long("max_pseudo_size")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("AGGREGATE")
                .help("How the cells of a pseudo-cell are combined")
                .short('a')
                .long("aggregate")
                .value_parser(["sum", "mean", "median", "downsample"]),
        )
        .arg(
            Arg::new("SEED")
                .help("Random seed")
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("MAX_BRANCHING")
                .help("Largest k of a single k-means split")
                .long("max_branching")
                .value_parser(value_parser!(usize)),
        )
        .arg(out_dir_arg())
}

fn post_rate_command() -> Command {
    Command::new("post-rate")
        .about("Posterior methylation rate from mc and cov count matrices")
        .arg(
            Arg::new("MC")
                .help("mc counts, cells x features mtx file")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("COV")
                .help("cov counts, cells x features mtx file")
                .required(true)
                .index(2)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("NO_NORMALIZE")
                .help("Do not divide by the per-cell prior mean")
                .long("no_normalize")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("CLIP")
                .help("Cap on normalized rates")
                .long("clip")
                .default_value("10")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("NO_CLIP")
                .help("Do not cap normalized rates")
                .long("no_clip")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("CELL_CHUNK")
                .help("Cells processed per block")
                .long("cell_chunk")
                .default_value("20000")
                .value_parser(value_parser!(usize)),
        )
        .arg(out_dir_arg())
}

fn jbrowse_command() -> Command {
    Command::new("jbrowse")
        .about("Create a JBrowse 2 browser with an assembly and annotation tracks")
        .arg(
            Arg::new("DIR")
                .help("Browser directory [default: ./jbrowse2]")
                .long("dir")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("FASTA")
                .help("Genome FASTA")
                .long("fasta")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GENES")
                .help("Gene annotation track")
                .long("genes")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("TRANSCRIPTS")
                .help("Transcript annotation track")
                .long("transcripts")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("SERVE")
                .help("Serve the browser on this port after creating it")
                .long("serve")
                .value_parser(value_parser!(u16)),
        )
}

fn motif_command() -> Command {
    Command::new("motif")
        .about("Scan BED intervals for motif matches with FIMO")
        .arg(
            Arg::new("BED")
                .help("Intervals to scan")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GENOME")
                .help("Indexed genome FASTA")
                .long("genome")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("MOTIFS")
                .help("MEME motif file")
                .long("motifs")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("FIMO_DIR")
                .help("Directory containing fimo")
                .long("fimo_dir")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("SCORE_THRESH")
                .long("score_thresh")
                .default_value("7")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("P_THRESH")
                .long("p_thresh")
                .default_value("0.0005")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("TOP_N")
                .long("top_n")
                .default_value("500000")
                .value_parser(value_parser!(usize)),
        )
        .arg(out_dir_arg())
}

fn ensure_dir(dir: &Path) -> Result<(), Error> {
    if !dir.exists() {
        create_dir_all(dir).with_context(|| dir.display().to_string())?;
    }
    Ok(())
}

fn pseudo_config(m: &ArgMatches) -> Result<PseudoCellConfig, Error> {
    let mut config = match m.get_one::<PathBuf>("CONFIG") {
        Some(path) => PseudoCellConfig::from_json(path)?,
        None => PseudoCellConfig::default(),
    };
    if let Some(&v) = m.get_one::<usize>("PSEUDOABLE_CLUSTER_SIZE") {
        config.pseudoable_cluster_size = v;
    }
    if let Some(&v) = m.get_one::<usize>("MAX_PSEUDO_SIZE") {
        config.max_pseudo_size = v;
    }
    if let Some(v) = m.get_one::<String>("AGGREGATE") {
        config.aggregate_func = v.parse::<AggregateFunc>()?;
    }
    if let Some(&v) = m.get_one::<u64>("SEED") {
        config.seed = v;
    }
    if let Some(&v) = m.get_one::<usize>("MAX_BRANCHING") {
        config.max_branching = v;
    }
    config.validate()?;
    Ok(config)
}

fn run_pseudo(m: &ArgMatches) -> Result<(), Error> {
    let embedding_path: &PathBuf = m.get_one("EMBEDDING").unwrap();
    let clusters_path: &PathBuf = m.get_one("CLUSTERS").unwrap();
    let out_dir: &PathBuf = m.get_one("OUT_DIR").unwrap();
    let config = pseudo_config(m)?;
    info!("{:?}", config);

    let embedding = read_labeled_csv(embedding_path)?;
    let cluster_of: HashMap<String, String> = read_clusters(clusters_path)?.into_iter().collect();
    let mut clusters = Vec::with_capacity(embedding.rows.len());
    for cell in &embedding.rows {
        let Some(cluster) = cluster_of.get(cell) else {
            bail!("cell {} of {} has no cluster", cell, embedding_path.display())
        };
        clusters.push(cluster.clone());
    }
    ensure_dir(out_dir)?;

    match m.get_one::<PathBuf>("FEATURES") {
        None => aggregate_and_write(&embedding, &clusters, &embedding.data, &embedding.cols, &config, out_dir),
        Some(path) if is_mtx(path) => {
            let features = load_mtx(path)?;
            let names: Vec<String> = (0..features.cols()).map(|i| i.to_string()).collect();
            aggregate_and_write(&embedding, &clusters, &features, &names, &config, out_dir)
        }
        Some(path) => {
            let features = read_labeled_csv(path)?;
            let index: HashMap<&str, usize> = features
                .rows
                .iter()
                .enumerate()
                .map(|(i, c)| (c.as_str(), i))
                .collect();
            let mut order = Vec::with_capacity(embedding.rows.len());
            for cell in &embedding.rows {
                let Some(&i) = index.get(cell.as_str()) else {
                    bail!("cell {} is missing from {}", cell, path.display())
                };
                order.push(i);
            }
            let aligned = features.data.select(Axis(0), &order);
            aggregate_and_write(&embedding, &clusters, &aligned, &features.cols, &config, out_dir)
        }
    }
}

fn is_mtx(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".mtx") || name.ends_with(".mtx.gz")
}

fn aggregate_and_write<M: AggregationMat>(
    embedding: &LabeledMatrix,
    clusters: &[String],
    features: &M,
    feature_names: &[String],
    config: &PseudoCellConfig,
    out_dir: &Path,
) -> Result<(), Error> {
    let (reduced, labels) = generate_pseudo_cells(clusters, &embedding.data.view(), features, config)?;

    write_cell_labels(out_dir.join("cell_pseudo_cell.csv.gz"), &embedding.rows, &labels)?;
    write_obs(out_dir.join("pseudo_cell_obs.csv.gz"), &reduced.obs)?;
    match &reduced.matrix {
        ReducedMatrix::Dense(data) => {
            let names: Vec<String> = reduced.obs.iter().map(|o| o.label.clone()).collect();
            write_labeled_csv(
                out_dir.join("pseudo_cell_features.csv.gz"),
                "pseudo_cell",
                &names,
                feature_names,
                &data.view(),
            )?;
        }
        ReducedMatrix::Sparse(data) => write_mtx_gz(out_dir.join("pseudo_cell_features.mtx.gz"), data)?,
    }
    Ok(())
}

fn run_post_rate(m: &ArgMatches) -> Result<(), Error> {
    let mc_path: &PathBuf = m.get_one("MC").unwrap();
    let cov_path: &PathBuf = m.get_one("COV").unwrap();
    let out_dir: &PathBuf = m.get_one("OUT_DIR").unwrap();
    let normalize = !m.get_flag("NO_NORMALIZE");
    let clip = if m.get_flag("NO_CLIP") {
        None
    } else {
        m.get_one::<f64>("CLIP").copied()
    };
    let cell_chunk: usize = *m.get_one("CELL_CHUNK").unwrap();

    if cell_chunk == 0 {
        bail!("--cell_chunk must be > 0");
    }

    let mc = load_mtx(mc_path)?;
    let cov = load_mtx(cov_path)?;
    if mc.shape() != cov.shape() {
        bail!(
            "{} has shape {:?} but {} has shape {:?}",
            mc_path.display(),
            mc.shape(),
            cov_path.display(),
            cov.shape()
        );
    }

    // one dense block of cells in memory at a time, written out before the next
    ensure_dir(out_dir)?;
    let out = out_dir.join("post_rate.csv.gz");
    let mut writer = BufWriter::new(GzEncoder::new(File::create(&out)?, Compression::default()));
    let n_cells = mc.rows();
    for start in (0..n_cells).step_by(cell_chunk) {
        let end = (start + cell_chunk).min(n_cells);
        let mc_block = mc.slice_outer(start..end).to_dense();
        let cov_block = cov.slice_outer(start..end).to_dense();
        let rate = calculate_posterior_mc_rate(&mc_block.view(), &cov_block.view(), normalize, clip)?;
        write_csv_rows(&rate.view(), &mut writer)?;
        info!("wrote posterior rates of cells {}..{} of {}", start, end, n_cells);
    }
    writer.into_inner()?.finish()?;
    Ok(())
}

fn run_jbrowse(m: &ArgMatches) -> Result<(), Error> {
    let dir = m.get_one::<PathBuf>("DIR");
    let fasta: &PathBuf = m.get_one("FASTA").unwrap();
    let genes: &PathBuf = m.get_one("GENES").unwrap();
    let transcripts = m.get_one::<PathBuf>("TRANSCRIPTS");

    let mut jbrowse = JBrowse::new(dir.map(PathBuf::as_path))?;
    jbrowse.create(fasta, genes, transcripts.map(PathBuf::as_path))?;
    info!("JBrowse config at {}", jbrowse.config().display());
    if let Some(&port) = m.get_one::<u16>("SERVE") {
        jbrowse.serve(port)?;
    }
    Ok(())
}

fn read_bed(path: &Path) -> Result<Vec<Interval>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(tools::io::open_maybe_gz(path)?);
    let mut intervals = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        let (Some(chrom), Some(start), Some(end)) = (record.get(0), record.get(1), record.get(2)) else {
            bail!("{}: BED lines need chrom, start and end", path.display())
        };
        intervals.push(Interval {
            chrom: chrom.to_string(),
            start: start.parse()?,
            end: end.parse()?,
        });
    }
    Ok(intervals)
}

fn run_motif(m: &ArgMatches) -> Result<(), Error> {
    let bed: &PathBuf = m.get_one("BED").unwrap();
    let genome: &PathBuf = m.get_one("GENOME").unwrap();
    let motifs: &PathBuf = m.get_one("MOTIFS").unwrap();
    let out_dir: &PathBuf = m.get_one("OUT_DIR").unwrap();

    let mut scanner = FimoScanner::new(genome);
    if let Some(dir) = m.get_one::<PathBuf>("FIMO_DIR") {
        scanner = scanner.with_fimo_dir(dir);
    }
    scanner.raw_score_thresh = *m.get_one("SCORE_THRESH").unwrap();
    scanner.raw_p_value_thresh = *m.get_one("P_THRESH").unwrap();
    scanner.top_n = *m.get_one("TOP_N").unwrap();

    let intervals = read_bed(bed)?;
    let hits = scanner.scan(&intervals, motifs)?;

    ensure_dir(out_dir)?;
    let out = out_dir.join("motif_hits.bed.gz");
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(GzEncoder::new(File::create(&out)?, Compression::default()));
    for h in &hits {
        writer.write_record([
            h.chrom.clone(),
            h.start.to_string(),
            h.end.to_string(),
            h.motif_id.clone(),
            h.motif_alt_id.clone(),
            h.score.to_string(),
            h.strand.to_string(),
            h.p_value.to_string(),
        ])?;
    }
    writer.flush()?;
    info!("wrote {} motif hits to {}", hits.len(), out.display());
    Ok(())
}

fn write_csv_rows(array: &ArrayView2<f64>, writer: &mut impl Write) -> Result<(), Error> {
    let num_cols = array.shape()[1];
    for row in array.axis_iter(Axis(0)) {
        for (i, entry) in row.iter().enumerate() {
            write!(writer, "{}", *entry)?;
            if i + 1 < num_cols {
                write!(writer, ",")?;
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}
