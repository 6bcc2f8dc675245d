use std::path::PathBuf;

use clap::Parser;
use log::info;

use nlexpr_rs::config::PropagationConfig;
use nlexpr_rs::domain::{BoxDomains, VarDomains};
use nlexpr_rs::graph::ExprGraph;
use nlexpr_rs::interval::Interval;
use nlexpr_rs::propagate::PropagationSession;
use nlexpr_rs::types::Var;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Number of variables.
    #[arg(value_name = "INT", default_value = "5")]
    n: u32,

    /// Right-hand side of the constraint `f(x) <= rhs`.
    #[clap(long, value_name = "FLOAT", default_value = "10")]
    rhs: f64,

    /// Initial bound on every variable, `x_i in [-bound, bound]`.
    #[clap(long, value_name = "FLOAT", default_value = "100")]
    bound: f64,

    /// Propagation settings (TOML).
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the simplified expression in DOT format.
    #[clap(long)]
    dot: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let config = match &args.config {
        Some(path) => PropagationConfig::load(path)?,
        None => PropagationConfig::default(),
    };
    println!("config = {:?}", config);

    let graph = ExprGraph::default();

    // Build f(x) = sum_i (i+1) * x_i^2 + sum_i x_i * x_{i+1} + sum_i x_i - sum_i x_i
    // The last two sums cancel during simplification.
    let n = args.n;
    println!("Building a quadratic over n = {} variables", n);
    let vars: Vec<_> = (0..n).map(|i| graph.mk_var(Var::new(i))).collect();
    let mut terms = Vec::new();
    let mut coefs = Vec::new();
    for (i, &x) in vars.iter().enumerate() {
        terms.push(graph.mk_pow(x, 2.0));
        coefs.push((i + 1) as f64);
    }
    for w in vars.windows(2) {
        terms.push(graph.mk_product(&[w[0], w[1]], 1.0));
        coefs.push(1.0);
    }
    for &x in &vars {
        graph.capture(x);
        terms.push(x);
        coefs.push(1.0);
        graph.capture(x);
        terms.push(x);
        coefs.push(-1.0);
    }
    let raw = graph.mk_sum(&terms, &coefs, 0.0);
    for &t in &terms {
        graph.release(t);
    }
    println!("raw = {} ({} nodes)", graph.to_infix(raw), graph.num_nodes());

    let time_simplify = std::time::Instant::now();
    let f = graph.simplify(raw);
    graph.release(raw);
    println!(
        "f = {} ({} nodes) in {:.3} s",
        graph.to_infix(f),
        graph.num_nodes(),
        time_simplify.elapsed().as_secs_f64()
    );

    if args.dot {
        println!("{}", graph.to_dot(&[f])?);
    }

    let mut domains = BoxDomains::new();
    for i in 0..n {
        domains.set_bounds(Var::new(i), -args.bound, args.bound);
    }

    let time_propagate = std::time::Instant::now();
    let mut session = PropagationSession::new(&graph, config);
    match session.propagate(&[(f, Interval::new(f64::NEG_INFINITY, args.rhs))], &mut domains) {
        Ok(result) => {
            info!(
                "propagation: {} rounds, {} tightenings",
                result.rounds, result.tightenings
            );
            for i in 0..n {
                let v = Var::new(i);
                println!("{} in {}", v, domains.bounds(v));
            }
        }
        Err(e) => println!("{}", e),
    }
    println!(
        "propagation done in {:.3} s, stats = {:?}",
        time_propagate.elapsed().as_secs_f64(),
        session.stats()
    );

    graph.release(f);
    for &x in &vars {
        graph.release(x);
    }
    assert_eq!(graph.num_nodes(), 0);

    println!("\nTotal time: {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}
