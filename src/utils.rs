use crate::error::IoError;
use itertools::Itertools;
use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub trait Statistic {
    fn mean(&self) -> f64;
    fn stat(&self, ddof: usize) -> (f64, f64);
    fn argsort(&self, ascending: bool) -> (Vec<usize>, Vec<f64>);
    /// median of the finite values, NaN when there are none
    fn median(&self) -> f64;
    fn distinct_count(&self) -> usize;
}

impl Statistic for &[f64] {
    /// caculate mean
    fn mean(&self) -> f64 {
        let sum = self.iter().sum::<f64>();
        let count = self.len() as f64;
        sum / count
    }
    /// return (mean, std)
    fn stat(&self, ddof: usize) -> (f64, f64) {
        let count = self.len();
        let mean = self.mean();
        if count <= ddof {
            return (mean, f64::NAN);
        }
        let variance = self
            .iter()
            .map(|&value| {
                let diff = mean - value;
                diff * diff
            })
            .sum::<f64>()
            / ((count - ddof) as f64);
        (mean, variance.sqrt())
    }
    fn argsort(&self, ascending: bool) -> (Vec<usize>, Vec<f64>) {
        let sorted_col: Vec<(usize, f64)> = self
            .iter()
            .copied()
            .enumerate()
            .sorted_by(|a, b| a.1.total_cmp(&b.1))
            .collect();
        let (mut sidx, mut sval): (Vec<usize>, Vec<f64>) = sorted_col.into_iter().unzip();
        if !ascending {
            sidx.reverse(); // inplace
            sval.reverse();
        }
        (sidx, sval)
    }
    fn median(&self) -> f64 {
        let mut x: Vec<f64> = self.iter().copied().filter(|v| v.is_finite()).collect();
        if x.is_empty() {
            return f64::NAN;
        }
        x.sort_unstable_by(|a, b| a.total_cmp(b));
        let mid = x.len() / 2;
        if x.len() % 2 == 0 {
            (x[mid - 1] + x[mid]) / 2.0
        } else {
            x[mid]
        }
    }
    fn distinct_count(&self) -> usize {
        self.iter().map(|v| v.to_bits()).unique().count()
    }
}

/// Dynamic Enum
#[derive(Debug, Clone, Default)]
pub struct DynamicEnum<T> {
    _elt_to_idx: HashMap<T, usize>, // element to index
    _idx_to_elt: Vec<T>,            // index to element
}

impl<T> DynamicEnum<T>
where
    T: Eq + Hash + Clone,
{
    /// an empty object
    pub fn new() -> Self {
        DynamicEnum {
            _idx_to_elt: Vec::<T>::new(),
            _elt_to_idx: HashMap::<T, usize>::new(),
        }
    }
    /// construct from vec, duplicated elements keep their first index
    pub fn from(vec: &[T]) -> Self {
        let mut dynum = Self::new();
        vec.iter().for_each(|v| {
            dynum.add_if_new(v.clone());
        });
        dynum
    }
    /// add element if new
    /// return indices whether new or not
    pub fn add_if_new(&mut self, element: T) -> usize {
        if let Some(&idx) = self._elt_to_idx.get(&element) {
            return idx;
        }
        let idx = self._idx_to_elt.len();
        self._idx_to_elt.push(element.clone());
        self._elt_to_idx.insert(element, idx);
        idx
    }
    /// get index of element
    pub fn index_of(&self, element: &T) -> Option<usize> {
        self._elt_to_idx.get(element).copied()
    }
    /// indices of the known elements, unknown ones are dropped
    pub fn index_of_any(&self, elements: &[T]) -> Vec<usize> {
        elements.iter().filter_map(|e| self.index_of(e)).collect()
    }
    pub fn contain_elt(&self, element: &T) -> bool {
        self._elt_to_idx.contains_key(element)
    }
    /// get element at position of index
    pub fn elt_of(&self, idx: usize) -> Option<&T> {
        self._idx_to_elt.get(idx)
    }
    pub fn size(&self) -> usize {
        self._idx_to_elt.len()
    }
    pub fn get_vec(&self) -> &Vec<T> {
        &self._idx_to_elt
    }
}

impl<T> PartialEq for DynamicEnum<T>
where
    T: Eq + Hash + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self._idx_to_elt == other._idx_to_elt
    }
}

pub struct FileReader {
    pub header: DynamicEnum<String>,
    pub record: Vec<Vec<String>>,
}

impl Default for FileReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReader {
    pub fn new() -> Self {
        FileReader {
            header: DynamicEnum::<String>::new(),
            record: Vec::<Vec<String>>::new(), // 2d vec init
        }
    }
    /// delimiter, comment: byte char literal input, e.g.  b'\t', b'#'
    pub fn read_csv<P: AsRef<Path>>(
        &mut self,
        file_path: P,
        delimiter: u8,
        header: bool,
        comment: Option<u8>,
    ) -> Result<(), IoError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(header)
            .comment(comment)
            .from_path(file_path)?;
        if header {
            for col in rdr.headers()?.iter() {
                self.header.add_if_new(col.to_string());
            }
        }
        for result in rdr.records() {
            let record = result?;
            self.record
                .push(record.iter().map(|x| x.to_string()).collect());
        }
        Ok(())
    }
    /// ragged lines, e.g. GMT
    pub fn read_table<P: AsRef<Path>>(
        &mut self,
        file_path: P,
        delimiter: char,
        header: bool,
    ) -> Result<(), IoError> {
        let input = File::open(file_path)?;
        let mut buffered = BufReader::new(input);
        if header {
            let mut _header: String = String::new();
            buffered.read_line(&mut _header)?;
            for col in _header.trim_end().split(delimiter) {
                self.header.add_if_new(col.to_string());
            }
        }
        for line in buffered.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let record: Vec<String> = line.split(delimiter).map(|x| x.to_string()).collect();
            self.record.push(record);
        }
        Ok(())
    }
}

/// parse a numeric cell. empty cells and NA spellings become NaN
pub fn parse_f64(value: &str, line: usize) -> Result<f64, IoError> {
    let v = value.trim();
    match v {
        "" | "NA" | "na" | "NaN" | "nan" => Ok(f64::NAN),
        _ => v.parse::<f64>().map_err(|_| IoError::Parse {
            line,
            value: v.to_string(),
        }),
    }
}

/// GMT: name, description, genes ...
pub fn read_gmt<P: AsRef<Path>>(file_path: P) -> Result<HashMap<String, Vec<String>>, IoError> {
    let mut gmt = FileReader::new();
    gmt.read_table(file_path, '\t', false)?;
    let mut gene_sets = HashMap::<String, Vec<String>>::new();
    for r in gmt.record.iter() {
        if r.len() < 2 {
            continue;
        }
        let genes = r[2..]
            .iter()
            .filter(|g| !g.is_empty())
            .cloned()
            .collect();
        gene_sets.insert(r[0].to_string(), genes);
    }
    Ok(gene_sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dynum() {
        let vec = vec!["A", "B", "C", "D"];
        let mut dynum = DynamicEnum::from(&vec);
        let x = dynum.add_if_new("E");
        let y = dynum.index_of(&"C").unwrap();
        let z = *dynum.elt_of(1).unwrap();
        assert_eq!(x, 4);
        assert_eq!(y, 2);
        assert_eq!(z, "B");
        assert_eq!(dynum.add_if_new("A"), 0);
        assert_eq!(dynum.size(), 5);
        assert_eq!(dynum.index_of_any(&["D", "X", "A"]), vec![3, 0]);
        assert!(dynum.contain_elt(&"E"));
        assert!(!dynum.contain_elt(&"Z"));
    }

    #[test]
    fn test_statistic() {
        let x = [3.0, 1.0, 2.0, 2.0];
        let s = &x[..];
        assert_eq!(s.mean(), 2.0);
        let (m, sd) = s.stat(1);
        assert_eq!(m, 2.0);
        assert!((sd - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(s.argsort(true).0, vec![1, 2, 3, 0]);
        assert_eq!(s.argsort(false).1, vec![3.0, 2.0, 2.0, 1.0]);
        assert_eq!(s.median(), 2.0);
        assert_eq!(s.distinct_count(), 3);
        let with_nan = [f64::NAN, 5.0, 1.0];
        assert_eq!((&with_nan[..]).median(), 3.0);
        let empty: [f64; 0] = [];
        assert!((&empty[..]).median().is_nan());
    }

    #[test]
    fn test_parse_f64() {
        assert_eq!(parse_f64(" 1.5 ", 1).unwrap(), 1.5);
        assert!(parse_f64("NA", 1).unwrap().is_nan());
        assert!(parse_f64("", 1).unwrap().is_nan());
        assert!(matches!(parse_f64("abc", 7), Err(IoError::Parse { line: 7, .. })));
    }

    #[test]
    fn test_gmt() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "APM\tantigen presentation\tB2M\tHLA-A\tTAP1").unwrap();
        writeln!(f, "IIS\tna\tCD8A\tGZMB\t").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "BROKEN").unwrap();
        f.flush().unwrap();
        let gmt = read_gmt(f.path()).unwrap();
        assert_eq!(gmt.len(), 2);
        assert_eq!(gmt["APM"], vec!["B2M", "HLA-A", "TAP1"]);
        assert_eq!(gmt["IIS"], vec!["CD8A", "GZMB"]);
    }

    #[test]
    fn test_rdr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expr.csv");
        std::fs::write(&path, "gene,s1\nB2M,1.25\nTAP1,NA\n").unwrap();
        let mut rdr = FileReader::new();
        rdr.read_csv(&path, b',', true, Some(b'#')).unwrap();
        assert_eq!(rdr.header.get_vec(), &vec!["gene".to_string(), "s1".to_string()]);
        assert_eq!(
            rdr.record,
            vec![
                vec!["B2M".to_string(), "1.25".to_string()],
                vec!["TAP1".to_string(), "NA".to_string()],
            ]
        );
        assert!(matches!(
            rdr.read_csv(dir.path().join("missing.csv"), b',', true, None),
            Err(IoError::Csv(_))
        ));
    }
}
