use std::io::{BufRead, BufReader, Read, Write};
use std::str::FromStr;

use log::{debug, warn};

use crate::error::Error;
use crate::factors::factor::Factor;
use crate::model::graphical_model::GraphicalModel;

/// Interface for reading from and writing to readers/writers in UAI format.
/// The format specification can be found [here](https://uaicompetition.github.io/uci-2022/file-formats/model-format/).
/// If `lg` is set to true, use the LG variant, where all table entries are
/// replaced by their natural logarithm.
pub trait UAI: Sized {
    fn read_uai<R: Read>(reader: R, lg: bool) -> Result<Self, Error>;
    fn write_uai<W: Write>(&self, writer: W, lg: bool) -> Result<(), Error>;
}

// States for reading UAI files
enum UAIState {
    ModelType,
    NumberOfVariables,
    DomainSizes,
    NumberOfFunctions,
    FunctionScopes(usize),            // function index
    NumberOfTableValues(usize),       // function index
    TableValues(usize, usize, usize), // function index, entries read, function table size
    EndOfFile,
}

pub fn string_to_vec<T: FromStr>(string: &str) -> Result<Vec<T>, Error> {
    string
        .split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|_| Error::Parse(format!("cannot parse token '{}'", token)))
        })
        .collect()
}

pub fn vec_to_string<T: ToString>(vector: &[T]) -> String {
    vector
        .iter()
        .map(|element| element.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl UAI for GraphicalModel {
    fn read_uai<R: Read>(reader: R, lg: bool) -> Result<Self, Error> {
        debug!("In read_uai() with lg option {}", lg);

        let mut state = UAIState::ModelType;

        let mut model = GraphicalModel::new(Vec::new());
        let mut num_variables = 0;
        let mut domain_sizes: Vec<usize> = Vec::new();
        let mut function_scopes: Vec<Vec<usize>> = Vec::new();
        let mut num_functions = 0;
        let mut function_entries: Vec<f64> = Vec::new();

        for line in BufReader::new(reader).lines() {
            let line = line?;
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() {
                continue;
            }

            match state {
                UAIState::ModelType => {
                    debug!("Reading model type");
                    if trimmed_line != "MARKOV" && trimmed_line != "BAYES" {
                        return Err(Error::Parse(format!(
                            "unsupported model type '{}'",
                            trimmed_line
                        )));
                    }
                    state = UAIState::NumberOfVariables;
                }
                UAIState::NumberOfVariables => {
                    debug!("Reading number of variables");
                    num_variables = trimmed_line
                        .parse()
                        .map_err(|_| Error::Parse("bad variable count".into()))?;
                    state = UAIState::DomainSizes;
                }
                UAIState::DomainSizes => {
                    debug!("Reading domain sizes");
                    domain_sizes = string_to_vec(trimmed_line)?;
                    if domain_sizes.len() != num_variables {
                        return Err(Error::Parse("domain size count mismatch".into()));
                    }
                    model = GraphicalModel::new(domain_sizes.clone());
                    state = UAIState::NumberOfFunctions;
                }
                UAIState::NumberOfFunctions => {
                    debug!("Reading number of functions");
                    num_functions = trimmed_line
                        .parse()
                        .map_err(|_| Error::Parse("bad function count".into()))?;
                    function_scopes = Vec::with_capacity(num_functions);
                    state = if num_functions > 0 {
                        UAIState::FunctionScopes(0)
                    } else {
                        UAIState::EndOfFile
                    };
                }
                UAIState::FunctionScopes(function_index) => {
                    debug!("Reading scope of function {}", function_index);
                    let function_desc = string_to_vec::<usize>(trimmed_line)?;
                    let (scope_len, function_scope) = function_desc.split_at(1);
                    if scope_len[0] != function_scope.len() {
                        return Err(Error::Parse(format!(
                            "scope length mismatch in function {}",
                            function_index
                        )));
                    }
                    function_scopes.push(function_scope.to_vec());
                    state = if function_index + 1 < num_functions {
                        UAIState::FunctionScopes(function_index + 1)
                    } else {
                        UAIState::NumberOfTableValues(0)
                    };
                }
                UAIState::NumberOfTableValues(function_index) => {
                    debug!("Reading function table size of function {}", function_index);
                    let num_entries = trimmed_line
                        .parse()
                        .map_err(|_| Error::Parse("bad table size".into()))?;
                    function_entries = Vec::with_capacity(num_entries);
                    state = UAIState::TableValues(function_index, 0, num_entries);
                }
                UAIState::TableValues(function_index, current_entries, num_entries) => {
                    let mut new_entries = string_to_vec(trimmed_line)?;
                    let new_current_entries = current_entries + new_entries.len();
                    function_entries.append(&mut new_entries);

                    if new_current_entries > num_entries {
                        return Err(Error::Parse(format!(
                            "too many table entries in function {}",
                            function_index
                        )));
                    }
                    if new_current_entries < num_entries {
                        debug!(
                            "Reading function {}. Collected {} out of {} entries.",
                            function_index, new_current_entries, num_entries
                        );
                        state =
                            UAIState::TableValues(function_index, new_current_entries, num_entries);
                        continue;
                    }

                    // Collected all entries; LG tables store log probabilities
                    let mut function_table = std::mem::take(&mut function_entries);
                    if lg {
                        function_table.iter_mut().for_each(|value| *value = value.exp());
                    }

                    let scope = function_scopes[function_index].clone();
                    let cardinalities = scope
                        .iter()
                        .map(|variable| {
                            domain_sizes.get(*variable).copied().ok_or_else(|| {
                                Error::Parse(format!("scope variable {} out of range", variable))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    model.add_factor(Factor::from_unsorted_scope(
                        scope,
                        cardinalities,
                        function_table,
                    ));

                    state = if function_index + 1 < num_functions {
                        UAIState::NumberOfTableValues(function_index + 1)
                    } else {
                        UAIState::EndOfFile
                    };
                }
                UAIState::EndOfFile => {
                    warn!("Ignored trailing line at the end of file: {}", line);
                }
            }
        }

        debug!("UAI import complete.");
        Ok(model)
    }

    fn write_uai<W: Write>(&self, writer: W, lg: bool) -> Result<(), Error> {
        debug!("In write_uai() with lg option {}", lg);
        let mut writer = writer;

        let mapping = [|value: f64| value, |value: f64| value.ln()][lg as usize];

        debug!("Writing preamble: graph type, variables, and domain sizes");
        writeln!(writer, "MARKOV")?;
        writeln!(writer, "{}", self.num_variables())?;
        writeln!(writer, "{}", vec_to_string(self.cardinalities()))?;

        debug!("Writing number of functions and function scopes");
        writeln!(writer, "{}", self.num_factors())?;
        for factor in self.factors_iter() {
            writeln!(
                writer,
                "{} {}",
                factor.scope().len(),
                vec_to_string(factor.scope().variables())
            )?;
        }

        debug!("Writing function tables");
        for factor in self.factors_iter() {
            let values: Vec<f64> = (0..factor.len()).map(|index| mapping(factor[index])).collect();
            writeln!(writer, "\n{}\n{}", values.len(), vec_to_string(&values))?;
        }

        debug!("UAI export complete.");
        Ok(())
    }
}

// Reads a UAI evidence file: an observation count followed by
// (variable, state) pairs, possibly spread over several lines
pub fn read_evidence<R: Read>(reader: R) -> Result<Vec<(usize, usize)>, Error> {
    let mut tokens: Vec<usize> = Vec::new();
    for line in BufReader::new(reader).lines() {
        tokens.append(&mut string_to_vec(line?.trim())?);
    }
    let (count, pairs) = tokens
        .split_first()
        .ok_or_else(|| Error::Parse("empty evidence file".into()))?;
    if pairs.len() != count * 2 {
        return Err(Error::Parse("evidence pair count mismatch".into()));
    }
    Ok(pairs.chunks(2).map(|pair| (pair[0], pair[1])).collect())
}
