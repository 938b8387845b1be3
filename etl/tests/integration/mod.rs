mod extractor_test;
mod loader_test;
mod pipeline_test;
