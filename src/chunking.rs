use std::collections::{BTreeMap, HashSet};

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Upper-case forms that are names rather than shouting.
pub const DEFAULT_KEEP_UPPER: [&str; 16] = [
    "I", "UK", "EU", "US", "UN", "MP", "MPs", "PM", "NHS", "NATO", "GDP", "VAT", "EEA", "SNP",
    "TV", "BBC",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDocument {
    pub chunks: Vec<String>,
    pub sentences_dropped: usize,
}

/// Splits on a run of terminators followed by whitespace. Line breaks are
/// treated as spaces, so sentences wrapped across lines stay whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let flattened = text.replace(['\r', '\n'], " ");
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut characters = flattened.chars().peekable();

    while let Some(character) = characters.next() {
        current.push(character);
        if !SENTENCE_TERMINATORS.contains(&character) {
            continue;
        }
        while let Some(next) = characters.next_if(|next| SENTENCE_TERMINATORS.contains(next)) {
            current.push(next);
        }
        if characters.peek().is_some_and(|next| next.is_whitespace()) {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, candidate: &str) {
    let sentence = candidate.split_whitespace().collect::<Vec<&str>>().join(" ");
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

/// Packs whole sentences greedily into chunks of at most `max_chars`
/// characters. A sentence longer than the limit is dropped.
pub fn chunk_sentences(sentences: &[String], max_chars: usize) -> ChunkedDocument {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;
    let mut sentences_dropped = 0usize;

    for sentence in sentences {
        let sentence_chars = sentence.chars().count();
        if sentence_chars > max_chars {
            sentences_dropped += 1;
            continue;
        }

        let separator = usize::from(!current.is_empty());
        if current_chars + separator + sentence_chars <= max_chars {
            if separator == 1 {
                current.push(' ');
            }
            current.push_str(sentence);
            current_chars += separator + sentence_chars;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(sentence);
            current_chars = sentence_chars;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    ChunkedDocument {
        chunks,
        sentences_dropped,
    }
}

/// Lower-cases words written entirely in capitals, keeping a capital on the
/// first word of each sentence. Words in `keep_upper` are left alone.
pub fn fix_capitalisation(text: &str, keep_upper: &HashSet<String>) -> String {
    let mut sentence_start = true;
    let mut words = Vec::new();

    for word in text.split_whitespace() {
        let core = word
            .chars()
            .filter(|character| character.is_alphanumeric() || *character == '_')
            .collect::<String>();

        let corrected = if !keep_upper.contains(&core) && is_shouting(&core) {
            let lowered = word.to_lowercase();
            if sentence_start {
                capitalise_first_letter(&lowered)
            } else {
                lowered
            }
        } else {
            word.to_string()
        };

        sentence_start = word.ends_with(SENTENCE_TERMINATORS);
        words.push(corrected);
    }

    words.join(" ")
}

fn is_shouting(word: &str) -> bool {
    let mut cased = word.chars().filter(|character| character.is_alphabetic()).peekable();
    cased.peek().is_some() && cased.all(char::is_uppercase)
}

fn capitalise_first_letter(word: &str) -> String {
    let mut output = String::with_capacity(word.len());
    let mut done = false;
    for character in word.chars() {
        if !done && character.is_alphabetic() {
            output.extend(character.to_uppercase());
            done = true;
        } else {
            output.push(character);
        }
    }
    output
}

pub fn chunk_document(text: &str, max_chars: usize, keep_upper: &HashSet<String>) -> ChunkedDocument {
    let mut document = chunk_sentences(&split_sentences(text), max_chars);
    for chunk in &mut document.chunks {
        *chunk = fix_capitalisation(chunk, keep_upper);
    }
    document
}

pub fn default_keep_upper() -> HashSet<String> {
    DEFAULT_KEEP_UPPER.iter().map(|word| word.to_string()).collect()
}

/// Word-count summary of one document's chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSizeStats {
    pub document_name: String,
    pub word_count: usize,
    pub chunk_count: usize,
    pub mean_chunk_words: f64,
    /// Sample standard deviation; undefined for a single chunk.
    pub chunk_words_std_dev: Option<f64>,
}

/// Groups `(document_name, chunk_text)` pairs by document, in name order.
pub fn chunk_size_stats<'a, I>(chunks: I) -> Vec<ChunkSizeStats>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sizes = BTreeMap::<&str, Vec<usize>>::new();
    for (document_name, chunk_text) in chunks {
        sizes
            .entry(document_name)
            .or_default()
            .push(chunk_text.split_whitespace().count());
    }

    sizes
        .into_iter()
        .map(|(document_name, words)| {
            let chunk_count = words.len();
            let word_count = words.iter().sum::<usize>();
            let mean_chunk_words = word_count as f64 / chunk_count as f64;
            let chunk_words_std_dev = (chunk_count > 1).then(|| {
                let squared_deviations = words
                    .iter()
                    .map(|size| (*size as f64 - mean_chunk_words).powi(2))
                    .sum::<f64>();
                (squared_deviations / (chunk_count - 1) as f64).sqrt()
            });

            ChunkSizeStats {
                document_name: document_name.to_string(),
                word_count,
                chunk_count,
                mean_chunk_words,
                chunk_words_std_dev,
            }
        })
        .collect()
}
