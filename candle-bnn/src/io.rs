use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Read a numeric matrix (one row per line, whitespace or comma
/// delimited) into an f32 tensor on `device`
///
/// * `input_file` - file name--either gzipped or not
/// * `skip` - number of header lines to skip
///
pub fn read_matrix(input_file: &str, skip: usize, device: &Device) -> anyhow::Result<Tensor> {
    let buf = open_buf_reader(input_file)?;

    let mut data: Vec<f32> = vec![];
    let mut ncols: Option<usize> = None;
    let mut nrows = 0;

    for (i, line) in buf.lines().enumerate().skip(skip) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|w| !w.is_empty())
            .map(|w| w.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("{}:{}: {}", input_file, i + 1, e))?;

        match ncols {
            None => ncols = Some(row.len()),
            Some(d) if d != row.len() => {
                anyhow::bail!(
                    "{}:{}: expected {} columns, got {}",
                    input_file,
                    i + 1,
                    d,
                    row.len()
                );
            }
            _ => {}
        }
        data.extend(row);
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| anyhow::anyhow!("No data in file {}", input_file))?;
    Ok(Tensor::from_vec(data, (nrows, ncols), device)?)
}

///
/// Write a 2D tensor as tab-separated lines
///
/// * `tensor` - (rows x cols) tensor
/// * `output_file` - file name--either gzipped or not
///
pub fn write_matrix(tensor: &Tensor, output_file: &str) -> anyhow::Result<()> {
    let rows = tensor
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .to_vec2::<f32>()?;

    let mut buf = open_buf_writer(output_file)?;
    for row in rows.iter() {
        let line = row
            .iter()
            .map(|x| format!("{}", x))
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

/// Write one number per line
pub fn write_vector(values: &[f32], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for x in values {
        writeln!(buf, "{}", x)?;
    }
    buf.flush()?;
    Ok(())
}
