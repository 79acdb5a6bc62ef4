use eyescan_core::{ConnectionType, Link};

use super::fail;

pub fn run(connection: &str) {
    let connection: ConnectionType = match connection.parse() {
        Ok(c) => c,
        Err(e) => fail(&e.to_string()),
    };
    let links = connection.links();
    println!("{connection}: {} links", links.len());
    println!();
    print!("{}", render(&links));
}

fn render(links: &[Link]) -> String {
    let mut out = format!("{:>3}  {:<18} {:<26} {:<26}\n", "ID", "Name", "TX", "RX");
    for link in links {
        out.push_str(&format!(
            "{:>3}  {:<18} {:<26} {:<26}\n",
            link.id,
            link.name(),
            link.tx,
            link.rx
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_link() {
        let links = ConnectionType::SelfLoopedX4.links();
        let text = render(&links);
        assert_eq!(text.lines().count(), links.len() + 1);
        assert!(text.contains(&links[0].name()));
        assert!(text.contains(".TX"));
        assert!(text.contains(".RX"));
    }
}
