use std::fs::File;
use std::process::ExitCode;
use std::time::Instant;

use log::info;

use ijgp_rust::model::uai::read_evidence;
use ijgp_rust::{Error, GraphicalModel, Solver, SolverOptions, Task, IJGP, UAI};

fn usage() -> ExitCode {
    eprintln!("usage: ijgp [-t PR|MAR|MAP] [-i I_BOUND] [-n ITERATIONS] MODEL.uai [EVIDENCE.evid]");
    ExitCode::FAILURE
}

fn solve(
    model_file: &str,
    evidence_file: Option<&str>,
    options: &SolverOptions,
) -> Result<(), Error> {
    let time_start = Instant::now();
    let mut model = GraphicalModel::read_uai(File::open(model_file)?, false)?;
    info!(
        "UAI import complete. Elapsed time {:?}.",
        time_start.elapsed()
    );

    if let Some(evidence_file) = evidence_file {
        let evidence = read_evidence(File::open(evidence_file)?)?;
        info!("Conditioning on {} observed variables.", evidence.len());
        model = model.condition(&evidence);
    }

    let time_start = Instant::now();
    let solver = IJGP::init(&model, options)?.run(options);
    info!(
        "Propagation finished after {} iterations (converged: {}). Elapsed time {:?}.",
        solver.iterations(),
        solver.converged(),
        time_start.elapsed()
    );

    match options.task() {
        Task::PR => {
            println!("PR");
            println!("{:.6}", solver.log_z() / std::f64::consts::LN_10);
        }
        Task::MAR => {
            println!("MAR");
            print!("{}", model.num_variables());
            for variable in 0..model.num_variables() {
                let belief = solver.belief(variable);
                print!(" {}", model.cardinality(variable));
                for state in 0..model.cardinality(variable) {
                    print!(" {:.6}", belief[state]);
                }
            }
            println!();
        }
        Task::MAP => {
            println!("MAP");
            print!("{}", model.num_variables());
            for variable in 0..model.num_variables() {
                print!(" {}", solver.solution()[variable].unwrap_or(0));
            }
            println!();
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut options = SolverOptions::default();
    let mut positional: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-t" => {
                let task = match args.next().as_deref() {
                    Some("PR") => Task::PR,
                    Some("MAR") => Task::MAR,
                    Some("MAP") => Task::MAP,
                    _ => return usage(),
                };
                options.set_task(task);
            }
            "-i" => match args.next().and_then(|value| value.parse().ok()) {
                Some(i_bound) => {
                    options.set_i_bound(i_bound);
                }
                None => return usage(),
            },
            "-n" => match args.next().and_then(|value| value.parse().ok()) {
                Some(iterations) => {
                    options.set_max_iterations(iterations);
                }
                None => return usage(),
            },
            _ => positional.push(arg),
        }
    }

    let (model_file, evidence_file) = match positional.as_slice() {
        [model_file] => (model_file.as_str(), None),
        [model_file, evidence_file] => (model_file.as_str(), Some(evidence_file.as_str())),
        _ => return usage(),
    };

    match solve(model_file, evidence_file, &options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::FAILURE
        }
    }
}
