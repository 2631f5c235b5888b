use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info};

use crate::model::multigraph::{GmModel, Graph, MgmModel};

/// Parses the textual model format: one `gm <g1> <g2>` header per graph pair,
/// followed by a `p <n1> <n2> <assignments> <edges>` line, `a` assignment
/// lines and `e` edge lines. Malformed or inconsistent input is rejected here;
/// the engine never receives it.
pub struct ModelParser;

impl ModelParser {
    pub fn from_path(path: &Path) -> Result<MgmModel> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read model file {:?}", path))?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<MgmModel> {
        let mut lines = text.lines().enumerate().peekable();

        if let Some((_, first)) = lines.peek() {
            if first.starts_with('p') {
                bail!("model file begins with a pairwise definition; missing 'gm <g1> <g2>' header");
            }
        }

        let mut graphs: Vec<Option<Graph>> = Vec::new();
        let mut parsed = Vec::new();

        while let Some((line_no, line)) = lines.next() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("gm") => {
                    let g1: usize = parse_token(tokens.next(), line_no, "graph id")?;
                    let g2: usize = parse_token(tokens.next(), line_no, "graph id")?;
                    debug!("Parsing pair ({g1}, {g2})");

                    let gm = parse_gm_block(&mut lines, g1, g2)?;
                    register_graph(&mut graphs, gm.graph1)?;
                    register_graph(&mut graphs, gm.graph2)?;
                    parsed.push(gm);
                }
                _ => bail!("line {}: expected 'gm <g1> <g2>', got {:?}", line_no + 1, line),
            }
        }

        let graphs: Vec<Graph> = graphs
            .into_iter()
            .enumerate()
            .map(|(id, g)| g.ok_or_else(|| anyhow::anyhow!("graph {id} never appears in any pair")))
            .collect::<Result<_>>()?;

        let mut model = MgmModel::new(graphs)?;
        for gm in parsed {
            model.add_model(gm)?;
        }
        info!(
            "Parsed model: {} graphs, {} pairwise models",
            model.graph_count(),
            model.models.len()
        );
        Ok(model)
    }

    /// Parses a single pairwise model (a file starting directly with `p`).
    pub fn gm_from_path(path: &Path) -> Result<GmModel> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read model file {:?}", path))?;
        Self::gm_from_str(&text)
    }

    pub fn gm_from_str(text: &str) -> Result<GmModel> {
        let mut lines = text.lines().enumerate().peekable();
        parse_gm_block(&mut lines, 0, 1)
    }
}

fn register_graph(graphs: &mut Vec<Option<Graph>>, graph: Graph) -> Result<()> {
    if graphs.len() <= graph.id {
        graphs.resize(graph.id + 1, None);
    }
    match graphs[graph.id] {
        None => graphs[graph.id] = Some(graph),
        Some(existing) if existing.node_count != graph.node_count => bail!(
            "graph {} declared with {} nodes but previously with {}",
            graph.id,
            graph.node_count,
            existing.node_count
        ),
        Some(_) => {}
    }
    Ok(())
}

fn parse_gm_block<'a, I>(lines: &mut I, g1: usize, g2: usize) -> Result<GmModel>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let (line_no, line) = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("unexpected end of file before 'p' line"))?;
    let mut tokens = line.trim().split_whitespace();
    if tokens.next() != Some("p") {
        bail!("line {}: expected 'p <n1> <n2> <a> <e>'", line_no + 1);
    }
    let n1: usize = parse_token(tokens.next(), line_no, "node count")?;
    let n2: usize = parse_token(tokens.next(), line_no, "node count")?;
    let no_assignments: usize = parse_token(tokens.next(), line_no, "assignment count")?;
    let no_edges: usize = parse_token(tokens.next(), line_no, "edge count")?;

    let mut gm = GmModel::with_capacity(
        Graph::new(g1, n1),
        Graph::new(g2, n2),
        no_assignments,
        no_edges,
    );

    for _ in 0..no_assignments {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("unexpected end of file inside assignment block"))?;
        let mut tokens = line.trim().split_whitespace();
        if tokens.next() != Some("a") {
            bail!("line {}: expected 'a <id> <n1> <n2> <cost>'", line_no + 1);
        }
        let id: usize = parse_token(tokens.next(), line_no, "assignment id")?;
        let node1: usize = parse_token(tokens.next(), line_no, "node")?;
        let node2: usize = parse_token(tokens.next(), line_no, "node")?;
        let cost: f64 = parse_token(tokens.next(), line_no, "cost")?;

        if id != gm.assignment_count() {
            bail!(
                "line {}: assignment ids must be sequential (expected {}, got {})",
                line_no + 1,
                gm.assignment_count(),
                id
            );
        }
        gm.add_assignment(node1, node2, cost)
            .with_context(|| format!("line {}", line_no + 1))?;
    }

    for _ in 0..no_edges {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| anyhow::anyhow!("unexpected end of file inside edge block"))?;
        let mut tokens = line.trim().split_whitespace();
        if tokens.next() != Some("e") {
            bail!("line {}: expected 'e <a1> <a2> <cost>'", line_no + 1);
        }
        let a_idx: usize = parse_token(tokens.next(), line_no, "assignment index")?;
        let b_idx: usize = parse_token(tokens.next(), line_no, "assignment index")?;
        let cost: f64 = parse_token(tokens.next(), line_no, "cost")?;
        gm.add_edge_by_index(a_idx, b_idx, cost)
            .with_context(|| format!("line {}", line_no + 1))?;
    }

    Ok(gm)
}

fn parse_token<T: std::str::FromStr>(
    token: Option<&str>,
    line_no: usize,
    what: &str,
) -> Result<T> {
    let token =
        token.ok_or_else(|| anyhow::anyhow!("line {}: missing {}", line_no + 1, what))?;
    token
        .parse()
        .map_err(|_| anyhow::anyhow!("line {}: invalid {} {:?}", line_no + 1, what, token))
}
